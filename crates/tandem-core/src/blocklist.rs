//! Read-only "is this space blocked" consultation.
//!
//! Moderation lives outside the engine. The Gateway only asks a
//! [`BlockCheck`] before every mutating intent and refuses the intent when
//! the space is blocked. [`BlockList`] is the in-memory implementation the
//! server keeps fresh from the database; [`NeverBlocked`] is for tests and
//! deployments without moderation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tandem_types::SpaceSlug;

/// Answer of a [`BlockCheck`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStatus {
    /// Whether mutations are refused.
    pub blocked: bool,
    /// Human-readable reason shown to the client.
    pub reason: Option<String>,
}

impl BlockStatus {
    /// The space may be mutated.
    pub const fn open() -> Self {
        Self {
            blocked: false,
            reason: None,
        }
    }

    /// The space is blocked for `reason`.
    pub const fn blocked(reason: Option<String>) -> Self {
        Self {
            blocked: true,
            reason,
        }
    }
}

/// A source of block decisions.
pub trait BlockCheck: Send + Sync {
    /// Whether `slug` is currently blocked.
    fn check(&self, slug: &SpaceSlug) -> BlockStatus;
}

/// Never blocks anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverBlocked;

impl BlockCheck for NeverBlocked {
    fn check(&self, _slug: &SpaceSlug) -> BlockStatus {
        BlockStatus::open()
    }
}

/// In-memory set of blocked slugs with optional reasons.
///
/// The whole set can be swapped atomically with [`BlockList::replace`],
/// which is how the periodic database refresh installs a new snapshot.
#[derive(Debug, Default)]
pub struct BlockList {
    entries: RwLock<HashMap<SpaceSlug, Option<String>>>,
}

impl BlockList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a single space.
    pub fn block(&self, slug: SpaceSlug, reason: Option<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slug, reason);
    }

    /// Unblock a single space. Returns whether it was blocked.
    pub fn unblock(&self, slug: &SpaceSlug) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(slug)
            .is_some()
    }

    /// Replace the whole list.
    pub fn replace(&self, entries: HashMap<SpaceSlug, Option<String>>) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;
    }

    /// Number of blocked spaces.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is blocked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockCheck for BlockList {
    fn check(&self, slug: &SpaceSlug) -> BlockStatus {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .map_or_else(BlockStatus::open, |reason| {
                BlockStatus::blocked(reason.clone())
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slug(s: &str) -> SpaceSlug {
        s.parse().unwrap()
    }

    #[test]
    fn block_and_unblock() {
        let list = BlockList::new();
        assert!(!list.check(&slug("demo")).blocked);

        list.block(slug("demo"), Some("spam".into()));
        let status = list.check(&slug("demo"));
        assert!(status.blocked);
        assert_eq!(status.reason.as_deref(), Some("spam"));
        assert!(!list.check(&slug("other")).blocked);

        assert!(list.unblock(&slug("demo")));
        assert!(list.is_empty());
    }

    #[test]
    fn replace_swaps_snapshot() {
        let list = BlockList::new();
        list.block(slug("old"), None);
        list.replace(HashMap::from([(slug("new"), None)]));

        assert!(!list.check(&slug("old")).blocked);
        assert_eq!(list.check(&slug("new")), BlockStatus::blocked(None));
    }

    #[test]
    fn never_blocked() {
        assert_eq!(NeverBlocked.check(&slug("demo")), BlockStatus::open());
    }
}
