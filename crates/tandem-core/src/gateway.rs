//! The synchronization gateway: the single entry point for client intents.
//!
//! Every intent is validated, checked against the [`BlockCheck`], applied to
//! the [`SpaceStore`] or [`PresenceTracker`], and then broadcast through the
//! [`BroadcastHub`]. The mutation and its publish happen under a per-space
//! sequencer lock, so subscribers of one space observe events in exactly the
//! order the mutations were applied. Different spaces never contend.
//!
//! # Echo policy
//!
//! Item events go to every subscriber, including the stream that issued the
//! intent; clients rely on that echo to confirm optimistic writes. Cursor
//! events skip the originating stream, which already drew its own pointer.
//!
//! # Failure policy
//!
//! | Failure | Outcome |
//! |---------|---------|
//! | Malformed payload | [`GatewayError::Validation`], no store touched |
//! | Blocked space | [`GatewayError::Forbidden`], mutation not attempted |
//! | Missing space or item | [`GatewayError::NotFound`], nothing broadcast |
//! | Reused item id | [`GatewayError::Conflict`] |
//! | Dead subscriber | evicted by the hub, never surfaced |
//! | Mirror queue full or closed | logged, never surfaced |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tandem_types::{
    CanvasItem, ClientId, CursorPosition, IdError, InvalidPayload, ItemDraft, ItemId, ItemPatch,
    Space, SpaceId, SpaceSlug, SpaceSnapshot, SseEvent, SubscriberId,
};
use tokio::task::JoinHandle;

use crate::blocklist::{BlockCheck, NeverBlocked};
use crate::config::PresenceConfig;
use crate::hub::{BroadcastHub, HubError, HubStats, Subscription};
use crate::mirror::{MirrorEvent, MirrorHandle};
use crate::presence::{CursorUpsert, PresenceTracker};
use crate::store::{SpaceStore, StoreError};

/// Default number of frames buffered per subscriber.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Errors surfaced to the caller of an intent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The space or item does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The space is blocked; the mutation was not attempted.
    #[error("space is blocked: {reason}")]
    Forbidden {
        /// Why the space is blocked.
        reason: String,
    },

    /// The slug or payload is malformed.
    #[error("{0}")]
    Validation(String),

    /// The item id is already taken or was used before.
    #[error("{0}")]
    Conflict(String),

    /// The event stream could not be opened.
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SpaceNotFound(_) | StoreError::ItemNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            StoreError::DuplicateItem(_) => Self::Conflict(err.to_string()),
            StoreError::Invalid(payload) => Self::Validation(payload.0),
        }
    }
}

impl From<IdError> for GatewayError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<InvalidPayload> for GatewayError {
    fn from(err: InvalidPayload) -> Self {
        Self::Validation(err.0)
    }
}

impl From<HubError> for GatewayError {
    fn from(err: HubError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Engine-wide counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Spaces opened since start.
    pub spaces: usize,
    /// Spaces with at least one tracked cursor.
    pub spaces_with_cursors: usize,
    /// Broadcast hub counters.
    pub hub: HubStats,
}

/// Orchestrates store, presence and hub for every space.
pub struct Gateway {
    store: SpaceStore,
    presence: PresenceTracker,
    hub: Arc<BroadcastHub>,
    blocks: Arc<dyn BlockCheck>,
    mirror: MirrorHandle,
    subscriber_buffer: usize,
    sequencers: Mutex<HashMap<SpaceSlug, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("spaces", &self.store.space_count())
            .field("hub", &self.hub)
            .field("mirror", &self.mirror.is_enabled())
            .field("subscriber_buffer", &self.subscriber_buffer)
            .finish_non_exhaustive()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    /// A gateway with empty state, no block list and no mirror.
    pub fn new() -> Self {
        Self {
            store: SpaceStore::new(),
            presence: PresenceTracker::new(),
            hub: Arc::new(BroadcastHub::new()),
            blocks: Arc::new(NeverBlocked),
            mirror: MirrorHandle::disabled(),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            sequencers: Mutex::new(HashMap::new()),
        }
    }

    /// Consult `blocks` before every mutating intent.
    #[must_use]
    pub fn with_block_check(mut self, blocks: Arc<dyn BlockCheck>) -> Self {
        self.blocks = blocks;
        self
    }

    /// Forward space and item lifecycle events to `mirror`.
    #[must_use]
    pub fn with_mirror(mut self, mirror: MirrorHandle) -> Self {
        self.mirror = mirror;
        self
    }

    /// Frames buffered per subscriber before it is evicted.
    #[must_use]
    pub const fn with_subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer;
        self
    }

    /// The underlying space store.
    pub const fn store(&self) -> &SpaceStore {
        &self.store
    }

    /// The underlying presence tracker.
    pub const fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// The underlying broadcast hub.
    pub const fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn sequencer(&self, slug: &SpaceSlug) -> Arc<Mutex<()>> {
        Arc::clone(
            self.sequencers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(slug.clone())
                .or_default(),
        )
    }

    /// Forget the sequencer of a slug with no space and no cursors.
    ///
    /// Handles are only cloned under the map lock, so a strong count of one
    /// means no caller holds or can be waiting on this sequencer.
    fn retire_sequencer(&self, slug: &SpaceSlug) {
        let mut sequencers = self
            .sequencers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let unused = sequencers
            .get(slug)
            .is_some_and(|sequencer| Arc::strong_count(sequencer) == 1);
        if unused && !self.store.contains(slug) && self.presence.is_vacant(slug) {
            sequencers.remove(slug);
        }
    }

    /// Number of live per-space sequencers.
    pub fn sequencer_count(&self) -> usize {
        self.sequencers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn ensure_writable(&self, slug: &SpaceSlug) -> Result<(), GatewayError> {
        let status = self.blocks.check(slug);
        if status.blocked {
            let reason = status
                .reason
                .unwrap_or_else(|| "blocked by moderation".to_owned());
            tracing::info!(%slug, %reason, "rejected intent on blocked space");
            return Err(GatewayError::Forbidden { reason });
        }
        Ok(())
    }

    /// Open the space, mirroring its creation if this call created it.
    fn open_space(&self, slug: &SpaceSlug) -> Space {
        let (space, created) = self.store.open(slug);
        if created {
            self.announce_space(slug, space.id, space.created_at);
        }
        space
    }

    /// Spaces are never removed, so a space seen here outlives the intent.
    fn require_space(&self, slug: &SpaceSlug) -> Result<(), GatewayError> {
        if self.store.contains(slug) {
            Ok(())
        } else {
            Err(StoreError::SpaceNotFound(slug.clone()).into())
        }
    }

    /// Make sure the space exists before mutating it.
    fn ensure_space(&self, slug: &SpaceSlug) {
        if let Some((space_id, created_at)) = self.store.ensure(slug) {
            self.announce_space(slug, space_id, created_at);
        }
    }

    fn announce_space(&self, slug: &SpaceSlug, space_id: SpaceId, created_at: DateTime<Utc>) {
        tracing::info!(%slug, %space_id, "space opened");
        self.mirror.send(MirrorEvent::SpaceCreated {
            space_id,
            slug: slug.clone(),
            created_at,
        });
    }

    fn broadcast(&self, slug: &SpaceSlug, event: &SseEvent, exclude: Option<SubscriberId>) {
        if let Err(error) = self.hub.publish(slug, event, exclude) {
            tracing::warn!(%slug, event = event.name(), %error, "broadcast failed");
        }
    }

    // -----------------------------------------------------------------------
    // Space intents
    // -----------------------------------------------------------------------

    /// Return the space for `slug`, creating it on first reference.
    pub fn get_or_create(&self, slug: &SpaceSlug) -> Space {
        self.open_space(slug)
    }

    /// The space with its items plus the cursors currently in it.
    pub fn space_snapshot(&self, slug: &SpaceSlug) -> SpaceSnapshot {
        SpaceSnapshot {
            space: self.open_space(slug),
            cursors: self.presence.list(slug),
        }
    }

    /// Clear every item of the space and broadcast `space:reset`. The space
    /// identity and its cursors are kept.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Forbidden`] if the space is blocked.
    pub fn reset_space(&self, slug: &SpaceSlug) -> Result<(), GatewayError> {
        self.ensure_writable(slug)?;
        let sequencer = self.sequencer(slug);
        let _turn = sequencer.lock().unwrap_or_else(PoisonError::into_inner);

        self.ensure_space(slug);
        let cleared = self.store.reset(slug);
        self.mirror.send(MirrorEvent::SpaceReset { slug: slug.clone() });
        self.broadcast(slug, &SseEvent::SpaceReset, None);
        tracing::info!(%slug, cleared, "space reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Item intents
    // -----------------------------------------------------------------------

    /// Create an item and broadcast `item:created` to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] for a malformed draft,
    /// [`GatewayError::Forbidden`] for a blocked space and
    /// [`GatewayError::Conflict`] for a reused id.
    pub fn create_item(
        &self,
        slug: &SpaceSlug,
        draft: ItemDraft,
    ) -> Result<CanvasItem, GatewayError> {
        draft.check()?;
        self.ensure_writable(slug)?;
        let sequencer = self.sequencer(slug);
        let _turn = sequencer.lock().unwrap_or_else(PoisonError::into_inner);

        self.ensure_space(slug);
        let item = self.store.create_item(slug, draft)?;
        self.mirror.send(MirrorEvent::ItemCreated {
            slug: slug.clone(),
            item: Box::new(item.clone()),
        });
        self.broadcast(slug, &SseEvent::ItemCreated { item: item.clone() }, None);
        Ok(item)
    }

    /// Merge `patch` into an item and broadcast `item:updated` with the
    /// merged item.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the space or item is missing
    /// (nothing is broadcast), [`GatewayError::Validation`] for a rejected
    /// patch and [`GatewayError::Forbidden`] for a blocked space.
    pub fn update_item(
        &self,
        slug: &SpaceSlug,
        item_id: &ItemId,
        patch: &ItemPatch,
    ) -> Result<CanvasItem, GatewayError> {
        patch.check()?;
        self.ensure_writable(slug)?;
        self.require_space(slug)?;
        let sequencer = self.sequencer(slug);
        let _turn = sequencer.lock().unwrap_or_else(PoisonError::into_inner);

        let item = self.store.update_item(slug, item_id, patch)?;
        self.broadcast(slug, &SseEvent::ItemUpdated { item: item.clone() }, None);
        Ok(item)
    }

    /// Delete an item and broadcast `item:deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if the space or item is missing
    /// (nothing is broadcast) and [`GatewayError::Forbidden`] for a
    /// blocked space.
    pub fn delete_item(&self, slug: &SpaceSlug, item_id: &ItemId) -> Result<(), GatewayError> {
        self.ensure_writable(slug)?;
        self.require_space(slug)?;
        let sequencer = self.sequencer(slug);
        let _turn = sequencer.lock().unwrap_or_else(PoisonError::into_inner);

        let removed = self.store.delete_item(slug, item_id)?;
        self.mirror.send(MirrorEvent::ItemDeleted {
            slug: slug.clone(),
            item_id: removed.id.clone(),
        });
        self.broadcast(slug, &SseEvent::ItemDeleted { item_id: removed.id }, None);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cursor intents
    // -----------------------------------------------------------------------

    /// Record a cursor position and broadcast `cursor:join` for a new
    /// client or `cursor:move` for a known one, skipping `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] for a malformed cursor and
    /// [`GatewayError::Forbidden`] for a blocked space.
    pub fn upsert_cursor(
        &self,
        slug: &SpaceSlug,
        cursor: CursorPosition,
        origin: Option<SubscriberId>,
    ) -> Result<CursorUpsert, GatewayError> {
        cursor.check()?;
        self.ensure_writable(slug)?;
        let sequencer = self.sequencer(slug);
        let _turn = sequencer.lock().unwrap_or_else(PoisonError::into_inner);

        let upsert = self.presence.upsert(slug, cursor);
        let event = if upsert.is_new {
            SseEvent::CursorJoin {
                cursor: upsert.cursor.clone(),
            }
        } else {
            SseEvent::CursorMove {
                cursor: upsert.cursor.clone(),
            }
        };
        self.broadcast(slug, &event, origin);
        Ok(upsert)
    }

    /// Remove a cursor and broadcast `cursor:leave` with its last known
    /// position, skipping `origin`. Returns `None` (and broadcasts nothing)
    /// if the client had no cursor. Leaving is allowed on blocked spaces.
    pub fn remove_cursor(
        &self,
        slug: &SpaceSlug,
        client_id: &ClientId,
        origin: Option<SubscriberId>,
    ) -> Option<CursorPosition> {
        if !self.presence.contains(slug, client_id) {
            return None;
        }
        let removed = {
            let sequencer = self.sequencer(slug);
            let _turn = sequencer.lock().unwrap_or_else(PoisonError::into_inner);

            let cursor = self.presence.remove(slug, client_id);
            if let Some(cursor) = &cursor {
                self.broadcast(
                    slug,
                    &SseEvent::CursorLeave {
                        cursor: cursor.clone(),
                    },
                    origin,
                );
            }
            cursor
        };
        self.retire_sequencer(slug);
        removed
    }

    /// Cursors currently tracked in the space.
    pub fn list_cursors(&self, slug: &SpaceSlug) -> Vec<CursorPosition> {
        self.presence.list(slug)
    }

    /// Drop cursors idle for longer than `ttl` and broadcast `cursor:leave`
    /// for each. Returns how many were dropped.
    pub fn sweep_idle_cursors(&self, now: Instant, ttl: Duration) -> usize {
        let mut total = 0_usize;
        for slug in self.presence.slugs() {
            {
                let sequencer = self.sequencer(&slug);
                let _turn = sequencer.lock().unwrap_or_else(PoisonError::into_inner);

                for cursor in self.presence.sweep_space(&slug, now, ttl) {
                    self.broadcast(&slug, &SseEvent::CursorLeave { cursor }, None);
                    total = total.saturating_add(1);
                }
            }
            self.retire_sequencer(&slug);
        }
        if total > 0 {
            tracing::debug!(count = total, "swept idle cursors");
        }
        total
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    /// Open an event stream for `slug`. Its first frame is the `connected`
    /// handshake; dropping it unsubscribes.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the handshake cannot be queued.
    pub fn open_subscription(&self, slug: &SpaceSlug) -> Result<Subscription, GatewayError> {
        let subscription = self.hub.open(slug, self.subscriber_buffer)?;
        tracing::info!(%slug, subscriber = %subscription.id(), "stream opened");
        Ok(subscription)
    }

    /// Current engine counters.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            spaces: self.store.space_count(),
            spaces_with_cursors: self.presence.space_count(),
            hub: self.hub.stats(),
        }
    }
}

/// Periodically drop idle cursors, if a cursor TTL is configured.
///
/// Returns `None` when `cursor_ttl_secs` is 0, which keeps cursors until an
/// explicit leave.
pub fn spawn_presence_sweep(
    gateway: Arc<Gateway>,
    config: &PresenceConfig,
) -> Option<JoinHandle<()>> {
    if config.cursor_ttl_secs == 0 {
        return None;
    }
    let ttl = Duration::from_secs(config.cursor_ttl_secs);
    let period = Duration::from_secs(config.sweep_interval_secs.max(1));
    tracing::info!(ttl_secs = config.cursor_ttl_secs, "cursor idle sweep enabled");

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            gateway.sweep_idle_cursors(Instant::now(), ttl);
        }
    }))
}
