//! Ephemeral per-space cursor tracking.
//!
//! Cursors are keyed by [`ClientId`] within a space. The first upsert for
//! a client is a join, later ones are moves; the caller picks the event
//! from [`CursorUpsert::is_new`]. A space's cursor map is dropped as soon
//! as its last cursor leaves. The space itself is unaffected.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tandem_types::{ClientId, CursorPosition, SpaceSlug};

/// Result of [`PresenceTracker::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct CursorUpsert {
    /// The cursor as stored.
    pub cursor: CursorPosition,
    /// `true` when no cursor existed for this client before the call.
    pub is_new: bool,
}

#[derive(Debug, Clone)]
struct TrackedCursor {
    cursor: CursorPosition,
    last_seen: Instant,
}

/// Tracks the latest cursor position of every client in every space.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    spaces: Mutex<HashMap<SpaceSlug, BTreeMap<ClientId, TrackedCursor>>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the cursor for its client.
    pub fn upsert(&self, slug: &SpaceSlug, cursor: CursorPosition) -> CursorUpsert {
        self.upsert_at(slug, cursor, Instant::now())
    }

    /// [`upsert`](Self::upsert) with an explicit observation time.
    pub fn upsert_at(
        &self,
        slug: &SpaceSlug,
        cursor: CursorPosition,
        now: Instant,
    ) -> CursorUpsert {
        let mut spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = spaces.entry(slug.clone()).or_default().insert(
            cursor.client_id.clone(),
            TrackedCursor {
                cursor: cursor.clone(),
                last_seen: now,
            },
        );
        CursorUpsert {
            cursor,
            is_new: previous.is_none(),
        }
    }

    /// Remove a client's cursor and return its last known position.
    pub fn remove(&self, slug: &SpaceSlug, client_id: &ClientId) -> Option<CursorPosition> {
        let mut spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
        let cursors = spaces.get_mut(slug)?;
        let removed = cursors.remove(client_id)?;
        if cursors.is_empty() {
            spaces.remove(slug);
        }
        Some(removed.cursor)
    }

    /// Every cursor in the space, ordered by client id.
    pub fn list(&self, slug: &SpaceSlug) -> Vec<CursorPosition> {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .map(|cursors| cursors.values().map(|t| t.cursor.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of spaces with at least one cursor.
    pub fn space_count(&self) -> usize {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the client has a cursor in the space.
    pub fn contains(&self, slug: &SpaceSlug, client_id: &ClientId) -> bool {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .is_some_and(|cursors| cursors.contains_key(client_id))
    }

    /// Whether the space has no cursors.
    pub fn is_vacant(&self, slug: &SpaceSlug) -> bool {
        !self
            .spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(slug)
    }

    /// Slugs of every space with at least one cursor.
    pub fn slugs(&self) -> Vec<SpaceSlug> {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Drop every cursor of the space not seen within `ttl` of `now` and
    /// return the removed cursors.
    pub fn sweep_space(
        &self,
        slug: &SpaceSlug,
        now: Instant,
        ttl: Duration,
    ) -> Vec<CursorPosition> {
        let mut spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(cursors) = spaces.get_mut(slug) else {
            return Vec::new();
        };
        let mut swept = Vec::new();
        cursors.retain(|_, tracked| {
            let idle = now.saturating_duration_since(tracked.last_seen) > ttl;
            if idle {
                swept.push(tracked.cursor.clone());
            }
            !idle
        });
        if cursors.is_empty() {
            spaces.remove(slug);
        }
        swept
    }
}
