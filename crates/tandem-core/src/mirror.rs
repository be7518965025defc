//! Best-effort hand-off of mutations to the secondary persistence store.
//!
//! The Gateway enqueues a [`MirrorEvent`] after each space creation, item
//! creation, item deletion and reset. Enqueueing never blocks and never
//! fails the caller: a full or closed queue only logs a warning. The
//! consumer (the database writer) lives in `tandem-db`.

use chrono::{DateTime, Utc};
use tandem_types::{CanvasItem, ItemId, SpaceId, SpaceSlug};
use tokio::sync::mpsc;

/// A mutation to mirror for administrative reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// A space was referenced for the first time.
    SpaceCreated {
        /// Identity of the new space.
        space_id: SpaceId,
        /// Its slug.
        slug: SpaceSlug,
        /// When it was created.
        created_at: DateTime<Utc>,
    },
    /// An item was created.
    ItemCreated {
        /// Owning space.
        slug: SpaceSlug,
        /// The stored item.
        item: Box<CanvasItem>,
    },
    /// An item was deleted.
    ItemDeleted {
        /// Owning space.
        slug: SpaceSlug,
        /// The removed item's id.
        item_id: ItemId,
    },
    /// All items of a space were cleared.
    SpaceReset {
        /// The reset space.
        slug: SpaceSlug,
    },
}

impl MirrorEvent {
    /// Short name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SpaceCreated { .. } => "space_created",
            Self::ItemCreated { .. } => "item_created",
            Self::ItemDeleted { .. } => "item_deleted",
            Self::SpaceReset { .. } => "space_reset",
        }
    }
}

/// Producer side of the mirror queue. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MirrorHandle {
    tx: Option<mpsc::Sender<MirrorEvent>>,
}

impl MirrorHandle {
    /// A bounded queue and the handle that feeds it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MirrorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A handle that discards everything.
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Whether events are forwarded anywhere.
    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Enqueue `event` without waiting. Failures are logged and dropped.
    pub fn send(&self, event: MirrorEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let kind = event.kind();
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(event = kind, "mirror queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(event = kind, "mirror writer stopped, dropping event");
            }
        }
    }
}
