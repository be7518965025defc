//! Optimistic local canvas state and the rules for folding server events
//! into it.
//!
//! A client applies its own edits immediately and sends them to the server
//! afterwards. Because the server echoes item events back to every stream,
//! including the one that issued them, and because in-flight requests can
//! land late, the client has to decide per event whether it is news or
//! noise:
//!
//! | Event | Discarded when |
//! |-------|----------------|
//! | `item:created` | the id was created locally and not yet echoed, or deleted locally within `delete_guard` |
//! | `item:updated` | the item was edited locally within `stale_window`, or deleted locally within `delete_guard` |
//!
//! Everything else is applied. Time is always passed in, so the
//! [`Reconciler`] is a plain deterministic state machine.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tandem_types::{
    CanvasItem, ClientId, CursorPosition, InvalidPayload, ItemDraft, ItemId, ItemPatch,
    SpaceSnapshot, SseEvent,
};

/// Default window in which remote updates for a locally edited item are
/// treated as stale.
pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_millis(500);

/// Default time a locally deleted id stays guarded against resurrection.
pub const DEFAULT_DELETE_GUARD: Duration = Duration::from_secs(5);

/// Default coalescing window for positional writes.
pub const DEFAULT_COALESCE_INTERVAL: Duration = Duration::from_millis(100);

/// Timing constants for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Remote `item:updated` events this soon after a local edit are dropped.
    pub stale_window: Duration,
    /// Remote create and update events this soon after a local delete are
    /// dropped. Unechoed local creates are also forgotten after this long.
    pub delete_guard: Duration,
    /// Minimum spacing of positional writes sent to the server.
    pub coalesce_interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_window: DEFAULT_STALE_WINDOW,
            delete_guard: DEFAULT_DELETE_GUARD,
            coalesce_interval: DEFAULT_COALESCE_INTERVAL,
        }
    }
}

/// Errors raised by local edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// The item is not on the local canvas.
    #[error("item {0} is not on the local canvas")]
    UnknownItem(ItemId),

    /// An item with this id is already on the local canvas.
    #[error("item {0} already exists on the local canvas")]
    DuplicateItem(ItemId),

    /// The local edit is malformed.
    #[error(transparent)]
    Invalid(#[from] InvalidPayload),
}

/// What [`Reconciler::apply_remote`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The event changed local state.
    Applied,
    /// The event was the echo of a local create and was dropped.
    SelfEcho,
    /// The event would overwrite a fresh local edit and was dropped.
    Stale,
    /// The event targets an id deleted locally and was dropped.
    DeleteGuarded,
    /// The event had nothing to act on.
    Ignored,
}

/// Last known-good state for an unacknowledged local edit.
#[derive(Debug, Clone)]
enum Pending {
    Create,
    Update {
        baseline: Box<CanvasItem>,
    },
    Delete {
        previous: Box<CanvasItem>,
        position: usize,
    },
}

/// A client's view of one space.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
    items: Vec<CanvasItem>,
    cursors: BTreeMap<ClientId, CursorPosition>,
    own_creates: HashMap<ItemId, Instant>,
    local_updates: HashMap<ItemId, Instant>,
    local_deletes: HashMap<ItemId, Instant>,
    pending: HashMap<ItemId, Pending>,
}

fn within(at: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(at) < window
}

fn draft_of(item: &CanvasItem) -> ItemDraft {
    ItemDraft {
        id: Some(item.id.clone()),
        x: item.x,
        y: item.y,
        width: item.width,
        height: item.height,
        content: item.content.clone(),
        color: item.color.clone(),
        z_index: Some(item.z_index),
        created_by: item.created_by.clone(),
        kind: item.kind.clone(),
    }
}

impl Reconciler {
    /// An empty canvas with the given timing.
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The timing in use.
    pub const fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Replace local state with a fresh server snapshot.
    ///
    /// Outstanding edits lose their rollback state; the delete guard is
    /// kept so a late echo still cannot resurrect a deleted item.
    pub fn load(&mut self, snapshot: SpaceSnapshot) {
        self.items = snapshot.space.items;
        self.cursors = snapshot
            .cursors
            .into_iter()
            .map(|cursor| (cursor.client_id.clone(), cursor))
            .collect();
        self.own_creates.clear();
        self.local_updates.clear();
        self.pending.clear();
    }

    /// Items in display order.
    pub fn items(&self) -> &[CanvasItem] {
        &self.items
    }

    /// A single item.
    pub fn item(&self, id: &ItemId) -> Option<&CanvasItem> {
        self.items.iter().find(|item| item.id == *id)
    }

    /// Other clients' cursors.
    pub fn cursors(&self) -> impl Iterator<Item = &CursorPosition> {
        self.cursors.values()
    }

    /// Whether a local edit of `id` is still awaiting the server.
    pub fn is_pending(&self, id: &ItemId) -> bool {
        self.pending.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Local edits
    // -----------------------------------------------------------------------

    /// Place a new item locally and return the draft to send.
    ///
    /// The id is remembered so the server's echo is not inserted twice.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::DuplicateItem`] if the id is already on
    /// the canvas.
    pub fn create_local(
        &mut self,
        item: CanvasItem,
        now: Instant,
    ) -> Result<ItemDraft, ReconcileError> {
        if self.item(&item.id).is_some() {
            return Err(ReconcileError::DuplicateItem(item.id));
        }
        let draft = draft_of(&item);
        self.own_creates.insert(item.id.clone(), now);
        self.pending.insert(item.id.clone(), Pending::Create);
        self.items.push(item);
        Ok(draft)
    }

    /// Apply a patch locally and return the updated item.
    ///
    /// Remote updates for the item are ignored for `stale_window` from
    /// `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownItem`] if the item is not on the
    /// canvas and [`ReconcileError::Invalid`] if the patch does not apply.
    pub fn update_local(
        &mut self,
        id: &ItemId,
        patch: &ItemPatch,
        now: Instant,
    ) -> Result<CanvasItem, ReconcileError> {
        let Some(item) = self.items.iter_mut().find(|item| item.id == *id) else {
            return Err(ReconcileError::UnknownItem(id.clone()));
        };
        let baseline = Box::new(item.clone());
        item.apply_patch(patch)?;

        self.pending
            .entry(id.clone())
            .or_insert(Pending::Update { baseline });
        self.local_updates.insert(id.clone(), now);
        Ok(item.clone())
    }

    /// Remove an item locally and return it.
    ///
    /// Remote create and update events for the id are ignored for
    /// `delete_guard` from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownItem`] if the item is not on the
    /// canvas.
    pub fn delete_local(&mut self, id: &ItemId, now: Instant) -> Result<CanvasItem, ReconcileError> {
        let Some(position) = self.items.iter().position(|item| item.id == *id) else {
            return Err(ReconcileError::UnknownItem(id.clone()));
        };
        let previous = self.items.remove(position);

        self.local_updates.remove(id);
        self.local_deletes.insert(id.clone(), now);
        // An unacknowledged create has nothing to restore on failure. An
        // unacknowledged update restores the state before that update.
        let restore = match self.pending.get(id) {
            Some(Pending::Create) => None,
            Some(Pending::Update { baseline }) => Some(baseline.clone()),
            Some(Pending::Delete { .. }) | None => Some(Box::new(previous.clone())),
        };
        if let Some(previous) = restore {
            self.pending
                .insert(id.clone(), Pending::Delete { previous, position });
        }
        Ok(previous)
    }

    /// The server accepted the last edit of `id`; forget its rollback
    /// state. Returns whether anything was pending.
    pub fn confirm(&mut self, id: &ItemId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// The server rejected the last edit of `id`; restore the last
    /// known-good state. Returns whether local state changed.
    pub fn rollback(&mut self, id: &ItemId) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        match pending {
            Pending::Create => {
                self.own_creates.remove(id);
                let before = self.items.len();
                self.items.retain(|item| item.id != *id);
                tracing::debug!(item_id = %id, "rolled back local create");
                self.items.len() != before
            }
            Pending::Update { baseline } => {
                self.local_updates.remove(id);
                tracing::debug!(item_id = %id, "rolled back local update");
                self.upsert(*baseline);
                true
            }
            Pending::Delete { previous, position } => {
                self.local_deletes.remove(id);
                tracing::debug!(item_id = %id, "rolled back local delete");
                if self.item(id).is_none() {
                    let position = position.min(self.items.len());
                    self.items.insert(position, *previous);
                }
                true
            }
        }
    }

    // -----------------------------------------------------------------------
    // Remote events
    // -----------------------------------------------------------------------

    /// Fold a server event into local state.
    pub fn apply_remote(&mut self, event: SseEvent, now: Instant) -> RemoteOutcome {
        self.expire(now);
        match event {
            SseEvent::ItemCreated { item } => {
                if self.local_deletes.contains_key(&item.id) {
                    return RemoteOutcome::DeleteGuarded;
                }
                if self.own_creates.remove(&item.id).is_some() {
                    if matches!(self.pending.get(&item.id), Some(Pending::Create)) {
                        self.pending.remove(&item.id);
                    }
                    return RemoteOutcome::SelfEcho;
                }
                self.upsert(item);
                RemoteOutcome::Applied
            }
            SseEvent::ItemUpdated { item } => {
                if self.local_deletes.contains_key(&item.id) {
                    return RemoteOutcome::DeleteGuarded;
                }
                if self.local_updates.contains_key(&item.id) {
                    return RemoteOutcome::Stale;
                }
                self.upsert(item);
                RemoteOutcome::Applied
            }
            SseEvent::ItemDeleted { item_id } => {
                self.own_creates.remove(&item_id);
                self.local_updates.remove(&item_id);
                self.pending.remove(&item_id);
                let before = self.items.len();
                self.items.retain(|item| item.id != item_id);
                if self.items.len() == before {
                    RemoteOutcome::Ignored
                } else {
                    RemoteOutcome::Applied
                }
            }
            SseEvent::SpaceReset => {
                self.items.clear();
                self.own_creates.clear();
                self.local_updates.clear();
                self.pending.clear();
                RemoteOutcome::Applied
            }
            SseEvent::CursorJoin { cursor } | SseEvent::CursorMove { cursor } => {
                self.cursors.insert(cursor.client_id.clone(), cursor);
                RemoteOutcome::Applied
            }
            SseEvent::CursorLeave { cursor } => {
                if self.cursors.remove(&cursor.client_id).is_some() {
                    RemoteOutcome::Applied
                } else {
                    RemoteOutcome::Ignored
                }
            }
        }
    }

    /// Replace the item with the same id, or append it.
    fn upsert(&mut self, item: CanvasItem) {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Drop guard entries whose window has passed.
    fn expire(&mut self, now: Instant) {
        let ReconcileConfig {
            stale_window,
            delete_guard,
            ..
        } = self.config;
        self.local_updates
            .retain(|_, at| within(*at, now, stale_window));
        self.local_deletes
            .retain(|_, at| within(*at, now, delete_guard));
        self.own_creates
            .retain(|_, at| within(*at, now, delete_guard));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::Utc;
    use tandem_types::ItemKind;

    use super::*;

    fn sticky(id: &str, x: f64) -> CanvasItem {
        ItemDraft::new(ItemKind::Sticky, x, 100.0).into_item(id.parse().unwrap(), Utc::now())
    }

    fn id(raw: &str) -> ItemId {
        raw.parse().unwrap()
    }

    #[test]
    fn own_create_echo_is_dropped_once() {
        let now = Instant::now();
        let mut canvas = Reconciler::default();
        let draft = canvas.create_local(sticky("s1", 1.0), now).unwrap();
        assert_eq!(draft.id, Some(id("s1")));

        let echo = SseEvent::ItemCreated {
            item: sticky("s1", 1.0),
        };
        assert_eq!(
            canvas.apply_remote(echo.clone(), now),
            RemoteOutcome::SelfEcho
        );
        assert_eq!(canvas.items().len(), 1);
        assert!(!canvas.is_pending(&id("s1")));

        // The id is forgotten after the first echo; a repeat just refreshes.
        assert_eq!(canvas.apply_remote(echo, now), RemoteOutcome::Applied);
        assert_eq!(canvas.items().len(), 1);
    }

    #[test]
    fn remote_update_inside_stale_window_is_dropped() {
        let start = Instant::now();
        let mut canvas = Reconciler::default();
        canvas.apply_remote(
            SseEvent::ItemCreated {
                item: sticky("s1", 0.0),
            },
            start,
        );
        canvas
            .update_local(&id("s1"), &ItemPatch::position(50.0, 100.0), start)
            .unwrap();

        let server_copy = SseEvent::ItemUpdated {
            item: sticky("s1", 10.0),
        };
        let early = start + Duration::from_millis(200);
        assert_eq!(
            canvas.apply_remote(server_copy.clone(), early),
            RemoteOutcome::Stale
        );
        assert_eq!(canvas.item(&id("s1")).unwrap().x.to_bits(), 50.0_f64.to_bits());

        let late = start + Duration::from_millis(600);
        assert_eq!(
            canvas.apply_remote(server_copy, late),
            RemoteOutcome::Applied
        );
        assert_eq!(canvas.item(&id("s1")).unwrap().x.to_bits(), 10.0_f64.to_bits());
    }

    #[test]
    fn delete_guard_blocks_resurrection_then_expires() {
        let start = Instant::now();
        let mut canvas = Reconciler::default();
        canvas.apply_remote(
            SseEvent::ItemCreated {
                item: sticky("s1", 0.0),
            },
            start,
        );
        canvas.delete_local(&id("s1"), start).unwrap();

        let late_update = SseEvent::ItemUpdated {
            item: sticky("s1", 9.0),
        };
        assert_eq!(
            canvas.apply_remote(late_update.clone(), start + Duration::from_secs(1)),
            RemoteOutcome::DeleteGuarded
        );
        assert!(canvas.item(&id("s1")).is_none());

        assert_eq!(
            canvas.apply_remote(late_update, start + Duration::from_secs(6)),
            RemoteOutcome::Applied
        );
    }

    #[test]
    fn rollback_restores_last_known_good() {
        let now = Instant::now();
        let mut canvas = Reconciler::default();
        canvas.apply_remote(
            SseEvent::ItemCreated {
                item: sticky("s1", 0.0),
            },
            now,
        );
        canvas.apply_remote(
            SseEvent::ItemCreated {
                item: sticky("s2", 0.0),
            },
            now,
        );

        canvas
            .update_local(&id("s1"), &ItemPatch::position(1.0, 1.0), now)
            .unwrap();
        canvas
            .update_local(&id("s1"), &ItemPatch::position(2.0, 2.0), now)
            .unwrap();
        assert!(canvas.rollback(&id("s1")));
        assert_eq!(canvas.item(&id("s1")).unwrap().x.to_bits(), 0.0_f64.to_bits());

        canvas.delete_local(&id("s1"), now).unwrap();
        assert!(canvas.rollback(&id("s1")));
        assert_eq!(canvas.items().first().unwrap().id, id("s1"));

        canvas.create_local(sticky("s3", 0.0), now).unwrap();
        assert!(canvas.rollback(&id("s3")));
        assert!(canvas.item(&id("s3")).is_none());

        assert!(!canvas.rollback(&id("s3")));
    }

    #[test]
    fn rejected_delete_after_unconfirmed_update_restores_confirmed_state() {
        let now = Instant::now();
        let mut canvas = Reconciler::default();
        canvas.apply_remote(
            SseEvent::ItemCreated {
                item: sticky("s1", 0.0),
            },
            now,
        );
        canvas
            .update_local(&id("s1"), &ItemPatch::position(75.0, 100.0), now)
            .unwrap();
        canvas.delete_local(&id("s1"), now).unwrap();
        assert!(canvas.item(&id("s1")).is_none());

        assert!(canvas.rollback(&id("s1")));
        assert_eq!(canvas.item(&id("s1")).unwrap().x.to_bits(), 0.0_f64.to_bits());
        assert!(!canvas.is_pending(&id("s1")));
    }

    #[test]
    fn confirm_clears_rollback_state() {
        let now = Instant::now();
        let mut canvas = Reconciler::default();
        canvas.create_local(sticky("s1", 0.0), now).unwrap();
        assert!(canvas.confirm(&id("s1")));
        assert!(!canvas.rollback(&id("s1")));
        assert!(canvas.item(&id("s1")).is_some());
    }

    #[test]
    fn invalid_local_patch_leaves_item_alone() {
        let now = Instant::now();
        let mut canvas = Reconciler::default();
        canvas.create_local(sticky("s1", 0.0), now).unwrap();
        let patch = ItemPatch {
            url: Some("https://example.com".into()),
            ..ItemPatch::default()
        };
        assert!(matches!(
            canvas.update_local(&id("s1"), &patch, now),
            Err(ReconcileError::Invalid(_))
        ));
        assert!(matches!(
            canvas.update_local(&id("ghost"), &ItemPatch::position(0.0, 0.0), now),
            Err(ReconcileError::UnknownItem(_))
        ));
    }

    #[test]
    fn reset_and_cursor_events() {
        let now = Instant::now();
        let mut canvas = Reconciler::default();
        canvas.create_local(sticky("s1", 0.0), now).unwrap();
        let cursor = CursorPosition::new("tab-2".parse().unwrap(), 3.0, 4.0);

        assert_eq!(
            canvas.apply_remote(
                SseEvent::CursorJoin {
                    cursor: cursor.clone()
                },
                now
            ),
            RemoteOutcome::Applied
        );
        assert_eq!(canvas.apply_remote(SseEvent::SpaceReset, now), RemoteOutcome::Applied);
        assert!(canvas.items().is_empty());
        assert_eq!(canvas.cursors().count(), 1);

        assert_eq!(
            canvas.apply_remote(SseEvent::CursorLeave { cursor: cursor.clone() }, now),
            RemoteOutcome::Applied
        );
        assert_eq!(
            canvas.apply_remote(SseEvent::CursorLeave { cursor }, now),
            RemoteOutcome::Ignored
        );
    }
}
