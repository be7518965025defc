//! Rate limiting for positional writes.
//!
//! A drag produces a move per pointer event, far more than the server needs.
//! [`WriteCoalescer`] folds the `x`/`y` part of every patch into one pending
//! patch per item and releases it when the item's window closes, so a burst
//! inside one window costs exactly one request and the request carries the
//! final position. Everything that is not positional bypasses the window.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tandem_types::{ItemId, ItemPatch};

use crate::reconcile::DEFAULT_COALESCE_INTERVAL;

#[derive(Debug, Clone)]
struct PendingWrite {
    patch: ItemPatch,
    due: Instant,
}

/// Per-item trailing-edge coalescer for `x`/`y` writes.
#[derive(Debug, Clone)]
pub struct WriteCoalescer {
    interval: Duration,
    pending: BTreeMap<ItemId, PendingWrite>,
}

impl Default for WriteCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_COALESCE_INTERVAL)
    }
}

impl WriteCoalescer {
    /// A coalescer releasing positional writes at most once per `interval`.
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: BTreeMap::new(),
        }
    }

    /// Queue a local change of `item_id`.
    ///
    /// The positional part is held until the item's window closes. The
    /// rest is returned and should be sent right away.
    pub fn push(&mut self, item_id: &ItemId, patch: ItemPatch, now: Instant) -> Option<ItemPatch> {
        let (positional, rest) = patch.split_position();
        if let Some(positional) = positional {
            if let Some(write) = self.pending.get_mut(item_id) {
                write.patch.merge(positional);
            } else {
                let due = now.checked_add(self.interval).unwrap_or(now);
                self.pending.insert(
                    item_id.clone(),
                    PendingWrite {
                        patch: positional,
                        due,
                    },
                );
            }
        }
        rest
    }

    /// Release every pending write whose window has closed by `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<(ItemId, ItemPatch)> {
        let due: Vec<ItemId> = self
            .pending
            .iter()
            .filter(|(_, write)| write.due <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|write| (id, write.patch)))
            .collect()
    }

    /// Release every pending write regardless of its window, e.g. when a
    /// drag ends.
    pub fn flush(&mut self) -> Vec<(ItemId, ItemPatch)> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(id, write)| (id, write.patch))
            .collect()
    }

    /// Drop the pending write of an item that no longer exists locally.
    pub fn discard(&mut self, item_id: &ItemId) -> bool {
        self.pending.remove(item_id).is_some()
    }

    /// When the next pending write is due, if any.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.values().map(|write| write.due).min()
    }

    /// Whether any write is pending.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_inside_one_window_sends_once_with_final_position() {
        let start = Instant::now();
        let id: ItemId = "s1".parse().unwrap();
        let mut coalescer = WriteCoalescer::default();

        for (offset, x) in [(0, 101.0), (30, 110.0), (60, 120.0)] {
            let rest = coalescer.push(&id, ItemPatch::position(x, 100.0), start + ms(offset));
            assert!(rest.is_none());
        }

        assert!(coalescer.poll(start + ms(99)).is_empty());
        let sent = coalescer.poll(start + ms(100));
        assert_eq!(sent, vec![(id, ItemPatch::position(120.0, 100.0))]);
        assert!(coalescer.is_idle());
    }

    #[test]
    fn non_positional_fields_bypass_the_window() {
        let now = Instant::now();
        let id: ItemId = "s1".parse().unwrap();
        let mut coalescer = WriteCoalescer::default();
        let patch = ItemPatch {
            color: Some("#f00".into()),
            ..ItemPatch::position(1.0, 2.0)
        };

        let rest = coalescer.push(&id, patch, now).unwrap();
        assert_eq!(rest.color.as_deref(), Some("#f00"));
        assert!(rest.x.is_none());
        assert_eq!(coalescer.next_due(), Some(now + ms(100)));
    }

    #[test]
    fn items_have_independent_windows() {
        let start = Instant::now();
        let a: ItemId = "a".parse().unwrap();
        let b: ItemId = "b".parse().unwrap();
        let mut coalescer = WriteCoalescer::default();

        coalescer.push(&a, ItemPatch::position(1.0, 1.0), start);
        coalescer.push(&b, ItemPatch::position(2.0, 2.0), start + ms(50));

        let first = coalescer.poll(start + ms(100));
        assert_eq!(first.len(), 1);
        assert_eq!(first.first().unwrap().0, a);

        assert!(coalescer.discard(&b));
        assert!(coalescer.flush().is_empty());
    }
}
