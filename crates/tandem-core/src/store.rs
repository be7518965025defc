//! The authoritative in-memory space store.
//!
//! Each space lives behind its own [`Mutex`]; the registry that maps slugs
//! to spaces sits behind an [`RwLock`] that is only write-locked the first
//! time a slug is referenced. A busy space therefore never stalls another.
//!
//! Beyond the item collection, each space remembers every item id it has
//! ever removed (by delete or reset). Those ids are never accepted again,
//! so an id names one logical item for its whole lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tandem_types::{
    CanvasItem, InvalidPayload, ItemDraft, ItemId, ItemPatch, Space, SpaceId, SpaceSlug,
};

/// Errors returned by [`SpaceStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No space has been opened under the slug.
    #[error("space {0} not found")]
    SpaceNotFound(SpaceSlug),

    /// The space exists but holds no item with the id.
    #[error("item {item_id} not found in space {slug}")]
    ItemNotFound {
        /// The space that was searched.
        slug: SpaceSlug,
        /// The missing item.
        item_id: ItemId,
    },

    /// The id is live or was used by an item that has since been removed.
    #[error("item id {0} is already in use in this space")]
    DuplicateItem(ItemId),

    /// The draft or patch failed validation.
    #[error("invalid payload: {0}")]
    Invalid(#[from] InvalidPayload),
}

/// Per-space state guarded by the space's mutex.
#[derive(Debug)]
struct SpaceEntry {
    space: Space,
    retired: HashSet<ItemId>,
}

impl SpaceEntry {
    fn new(slug: SpaceSlug) -> Self {
        let now = Utc::now();
        Self {
            space: Space {
                id: SpaceId::new(),
                slug,
                items: Vec::new(),
                created_at: now,
                updated_at: now,
            },
            retired: HashSet::new(),
        }
    }

    /// Next mutation timestamp. Never earlier than the previous one, even
    /// if the wall clock steps backwards.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.space.updated_at);
        self.space.updated_at = now;
        now
    }

    fn position(&self, item_id: &ItemId) -> Option<usize> {
        self.space.items.iter().position(|item| &item.id == item_id)
    }

    fn not_found(&self, item_id: &ItemId) -> StoreError {
        StoreError::ItemNotFound {
            slug: self.space.slug.clone(),
            item_id: item_id.clone(),
        }
    }
}

type SharedEntry = Arc<Mutex<SpaceEntry>>;

/// In-memory store of every space and its items.
#[derive(Debug, Default)]
pub struct SpaceStore {
    spaces: RwLock<HashMap<SpaceSlug, SharedEntry>>,
}

impl SpaceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, slug: &SpaceSlug) -> Option<SharedEntry> {
        self.spaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .cloned()
    }

    /// Fetch the entry for `slug`, creating it if needed. The flag is
    /// `true` when this call created the space.
    fn entry(&self, slug: &SpaceSlug) -> (SharedEntry, bool) {
        if let Some(entry) = self.lookup(slug) {
            return (entry, false);
        }
        let mut spaces = self.spaces.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks.
        if let Some(entry) = spaces.get(slug) {
            return (Arc::clone(entry), false);
        }
        let entry = Arc::new(Mutex::new(SpaceEntry::new(slug.clone())));
        spaces.insert(slug.clone(), Arc::clone(&entry));
        tracing::debug!(%slug, "space created");
        (entry, true)
    }

    fn existing(&self, slug: &SpaceSlug) -> Result<SharedEntry, StoreError> {
        self.lookup(slug)
            .ok_or_else(|| StoreError::SpaceNotFound(slug.clone()))
    }

    /// Return the space for `slug`, creating it on first reference, and
    /// whether this call created it.
    pub fn open(&self, slug: &SpaceSlug) -> (Space, bool) {
        let (entry, created) = self.entry(slug);
        let space = entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .space
            .clone();
        (space, created)
    }

    /// Create the space if it does not exist yet. Returns its identity and
    /// creation time only when this call created it.
    pub fn ensure(&self, slug: &SpaceSlug) -> Option<(SpaceId, DateTime<Utc>)> {
        let (entry, created) = self.entry(slug);
        if !created {
            return None;
        }
        let guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some((guard.space.id, guard.space.created_at))
    }

    /// Idempotent lookup-or-create. Repeated calls return the same space
    /// identity with a non-decreasing `updated_at`.
    pub fn get_or_create(&self, slug: &SpaceSlug) -> Space {
        self.open(slug).0
    }

    /// Whether the space for `slug` has been opened.
    pub fn contains(&self, slug: &SpaceSlug) -> bool {
        self.lookup(slug).is_some()
    }

    /// The space for `slug`, if it has been opened.
    pub fn get(&self, slug: &SpaceSlug) -> Option<Space> {
        self.lookup(slug).map(|entry| {
            entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .space
                .clone()
        })
    }

    /// A single item, if both the space and the item exist.
    pub fn item(&self, slug: &SpaceSlug, item_id: &ItemId) -> Option<CanvasItem> {
        let entry = self.lookup(slug)?;
        let guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        guard.space.item(item_id).cloned()
    }

    /// Number of spaces opened so far.
    pub fn space_count(&self) -> usize {
        self.spaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Append a new item built from `draft`, creating the space if needed.
    ///
    /// The id is taken from the draft or minted; `created_at`/`updated_at`
    /// are stamped by the store and `z_index` defaults to 0.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] if the draft fails validation and
    /// [`StoreError::DuplicateItem`] if its id is live or retired.
    pub fn create_item(
        &self,
        slug: &SpaceSlug,
        draft: ItemDraft,
    ) -> Result<CanvasItem, StoreError> {
        draft.check()?;
        let (entry, _) = self.entry(slug);
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);

        let id = draft.id.clone().unwrap_or_else(ItemId::generate);
        if guard.retired.contains(&id) || guard.position(&id).is_some() {
            return Err(StoreError::DuplicateItem(id));
        }

        let now = guard.stamp();
        let item = draft.into_item(id, now);
        guard.space.items.push(item.clone());
        tracing::debug!(%slug, item_id = %item.id, item_type = %item.item_type(), "item created");
        Ok(item)
    }

    /// Merge the fields present in `patch` into an existing item and
    /// return the merged item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SpaceNotFound`] or [`StoreError::ItemNotFound`]
    /// if the target is missing, and [`StoreError::Invalid`] if the patch is
    /// rejected. A rejected patch leaves the item untouched.
    pub fn update_item(
        &self,
        slug: &SpaceSlug,
        item_id: &ItemId,
        patch: &ItemPatch,
    ) -> Result<CanvasItem, StoreError> {
        let entry = self.existing(slug)?;
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);

        let index = guard.position(item_id).ok_or_else(|| guard.not_found(item_id))?;
        let mut merged = guard
            .space
            .items
            .get(index)
            .cloned()
            .ok_or_else(|| guard.not_found(item_id))?;
        merged.apply_patch(patch)?;
        merged.updated_at = guard.stamp();

        if let Some(slot) = guard.space.items.get_mut(index) {
            slot.clone_from(&merged);
        }
        tracing::debug!(%slug, %item_id, "item updated");
        Ok(merged)
    }

    /// Remove an item and return it. Its id is retired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SpaceNotFound`] or [`StoreError::ItemNotFound`]
    /// if the target is missing; nothing changes in that case.
    pub fn delete_item(
        &self,
        slug: &SpaceSlug,
        item_id: &ItemId,
    ) -> Result<CanvasItem, StoreError> {
        let entry = self.existing(slug)?;
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);

        let index = guard.position(item_id).ok_or_else(|| guard.not_found(item_id))?;
        let removed = guard.space.items.remove(index);
        guard.retired.insert(removed.id.clone());
        guard.stamp();
        tracing::debug!(%slug, %item_id, "item deleted");
        Ok(removed)
    }

    /// Clear every item from the space, keeping the space record. Returns
    /// how many items were removed. The space is created if needed.
    pub fn reset(&self, slug: &SpaceSlug) -> usize {
        let (entry, _) = self.entry(slug);
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);

        let cleared: Vec<CanvasItem> = std::mem::take(&mut guard.space.items);
        let count = cleared.len();
        guard.retired.extend(cleared.into_iter().map(|item| item.id));
        guard.stamp();
        tracing::debug!(%slug, cleared = count, "space reset");
        count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tandem_types::{ItemKind, ShapeType};

    use super::*;

    fn slug(s: &str) -> SpaceSlug {
        s.parse().unwrap()
    }

    fn sticky(id: &str) -> ItemDraft {
        ItemDraft::new(ItemKind::Sticky, 100.0, 100.0).with_id(id.parse().unwrap())
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = SpaceStore::new();
        let (first, created) = store.open(&slug("demo"));
        assert!(created);
        let (second, created_again) = store.open(&slug("demo"));
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.space_count(), 1);
        assert!(store.ensure(&slug("demo")).is_none());
        assert!(store.ensure(&slug("fresh")).is_some());
    }

    #[test]
    fn create_assigns_server_fields() {
        let store = SpaceStore::new();
        let draft = ItemDraft::new(
            ItemKind::Shape {
                shape_type: ShapeType::Star,
            },
            3.0,
            4.0,
        );
        let item = store.create_item(&slug("demo"), draft).unwrap();

        assert_eq!(item.z_index, 0);
        assert_eq!(item.created_at, item.updated_at);
        let space = store.get(&slug("demo")).unwrap();
        assert_eq!(space.items.len(), 1);
        assert_eq!(space.updated_at, item.updated_at);
    }

    #[test]
    fn items_keep_insertion_order() {
        let store = SpaceStore::new();
        for id in ["c", "a", "b"] {
            store.create_item(&slug("demo"), sticky(id)).unwrap();
        }
        let ids: Vec<String> = store
            .get(&slug("demo"))
            .unwrap()
            .items
            .into_iter()
            .map(|item| item.id.to_string())
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn duplicate_and_retired_ids_are_rejected() {
        let store = SpaceStore::new();
        store.create_item(&slug("demo"), sticky("s1")).unwrap();
        assert!(matches!(
            store.create_item(&slug("demo"), sticky("s1")),
            Err(StoreError::DuplicateItem(_))
        ));

        store.delete_item(&slug("demo"), &"s1".parse().unwrap()).unwrap();
        assert!(matches!(
            store.create_item(&slug("demo"), sticky("s1")),
            Err(StoreError::DuplicateItem(_))
        ));

        // Ids are scoped to their space.
        assert!(store.create_item(&slug("other"), sticky("s1")).is_ok());
    }

    #[test]
    fn reset_retires_ids_and_keeps_identity() {
        let store = SpaceStore::new();
        let before = store.get_or_create(&slug("demo"));
        store.create_item(&slug("demo"), sticky("s1")).unwrap();
        store.create_item(&slug("demo"), sticky("s2")).unwrap();

        assert_eq!(store.reset(&slug("demo")), 2);
        let after = store.get_or_create(&slug("demo"));
        assert_eq!(after.id, before.id);
        assert!(after.items.is_empty());
        assert!(store.create_item(&slug("demo"), sticky("s2")).is_err());
    }

    #[test]
    fn update_stamps_item_and_space() {
        let store = SpaceStore::new();
        let created = store.create_item(&slug("demo"), sticky("s1")).unwrap();
        let updated = store
            .update_item(&slug("demo"), &created.id, &ItemPatch::position(5.0, 6.0))
            .unwrap();

        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);
        let space = store.get(&slug("demo")).unwrap();
        assert_eq!(space.updated_at, updated.updated_at);
        assert_eq!(space.item(&created.id), Some(&updated));
    }

    #[test]
    fn update_missing_targets() {
        let store = SpaceStore::new();
        let id: ItemId = "ghost".parse().unwrap();
        assert!(matches!(
            store.update_item(&slug("nowhere"), &id, &ItemPatch::position(1.0, 1.0)),
            Err(StoreError::SpaceNotFound(_))
        ));
        store.get_or_create(&slug("demo"));
        assert!(matches!(
            store.update_item(&slug("demo"), &id, &ItemPatch::position(1.0, 1.0)),
            Err(StoreError::ItemNotFound { .. })
        ));
        // Failed lookups never create spaces.
        assert_eq!(store.space_count(), 1);
    }

    #[test]
    fn rejected_patch_leaves_item_untouched() {
        let store = SpaceStore::new();
        let created = store.create_item(&slug("demo"), sticky("s1")).unwrap();
        let bad = ItemPatch {
            x: Some(f64::NAN),
            ..ItemPatch::default()
        };
        assert!(matches!(
            store.update_item(&slug("demo"), &created.id, &bad),
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(store.item(&slug("demo"), &created.id), Some(created));
    }

    #[test]
    fn delete_missing_item_has_no_side_effect() {
        let store = SpaceStore::new();
        store.create_item(&slug("demo"), sticky("s1")).unwrap();
        let before = store.get(&slug("demo")).unwrap();

        let result = store.delete_item(&slug("demo"), &"nope".parse().unwrap());
        assert!(matches!(result, Err(StoreError::ItemNotFound { .. })));
        assert_eq!(store.get(&slug("demo")).unwrap(), before);
    }
}
