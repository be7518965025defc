//! Per-space subscriber registry and best-effort event fan-out.
//!
//! Every live event stream registers an [`EventSink`] under its space. A
//! publish serializes the event once, copies the space's subscriber list
//! out of the registry, releases the lock, and writes the frame to each
//! sink. A sink that fails a write is dead: it is removed in the same
//! publish call and never retried. A space whose last subscriber leaves
//! is dropped from the registry.
//!
//! Writes never block. [`ChannelSink`] pushes into a bounded channel with
//! `try_send`; a subscriber that stops draining fills its channel and is
//! evicted like a disconnected one, which ends its stream and makes the
//! client reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tandem_types::{Handshake, SpaceSlug, SseEvent, SubscriberId};
use tokio::sync::mpsc;

/// One serialized frame, shared by every subscriber it is sent to.
pub type Frame = Arc<str>;

/// Why a sink could not take a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The receiving end is gone.
    #[error("subscriber disconnected")]
    Closed,

    /// The subscriber is not keeping up.
    #[error("subscriber buffer full")]
    Full,
}

/// Errors returned by [`BroadcastHub`] operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The event could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The handshake could not be queued on a fresh stream.
    #[error("failed to queue handshake: {0}")]
    Handshake(SinkError),
}

/// Destination for one subscriber's frames.
pub trait EventSink: Send + Sync {
    /// Hand a frame to the subscriber without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the subscriber can no longer receive.
    fn deliver(&self, frame: &Frame) -> Result<(), SinkError>;
}

/// [`EventSink`] backed by a bounded Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    /// Wrap the sending half of a channel.
    pub const fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, frame: &Frame) -> Result<(), SinkError> {
        self.tx.try_send(Arc::clone(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Outcome of a single [`BroadcastHub::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Frames successfully handed to sinks.
    pub delivered: usize,
    /// Subscribers removed because their sink failed.
    pub evicted: usize,
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Events published since start.
    pub events_published: u64,
    /// Frames delivered since start.
    pub frames_delivered: u64,
    /// Subscribers evicted after a failed write since start.
    pub subscribers_evicted: u64,
    /// Currently registered subscribers.
    pub live_subscribers: usize,
    /// Spaces with at least one subscriber.
    pub live_spaces: usize,
}

#[derive(Debug, Default)]
struct Counters {
    events_published: AtomicU64,
    frames_delivered: AtomicU64,
    subscribers_evicted: AtomicU64,
}

fn widen(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

type SinkMap = HashMap<SubscriberId, Arc<dyn EventSink>>;

/// Registry of live subscribers, keyed by space.
#[derive(Default)]
pub struct BroadcastHub {
    spaces: Mutex<HashMap<SpaceSlug, SinkMap>>,
    counters: Counters,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` under `slug` and return its new subscriber id.
    pub fn subscribe(&self, slug: &SpaceSlug, sink: Arc<dyn EventSink>) -> SubscriberId {
        let id = SubscriberId::new();
        self.register(slug, id, sink);
        id
    }

    fn register(&self, slug: &SpaceSlug, id: SubscriberId, sink: Arc<dyn EventSink>) {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(slug.clone())
            .or_default()
            .insert(id, sink);
        tracing::debug!(%slug, subscriber = %id, "subscriber registered");
    }

    /// Open a channel-backed stream for `slug`.
    ///
    /// The `connected` handshake is queued before the subscriber is
    /// registered, so it is always the first frame the stream yields.
    /// Dropping the returned [`Subscription`] unsubscribes it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError`] if the handshake cannot be encoded or queued.
    pub fn open(self: &Arc<Self>, slug: &SpaceSlug, buffer: usize) -> Result<Subscription, HubError> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = SubscriberId::new();

        let handshake: Frame = serde_json::to_string(&Handshake::new(id))?.into();
        let sink = ChannelSink::new(tx);
        sink.deliver(&handshake).map_err(HubError::Handshake)?;
        self.register(slug, id, Arc::new(sink));

        Ok(Subscription {
            id,
            slug: slug.clone(),
            rx,
            hub: Arc::clone(self),
        })
    }

    /// Remove a subscriber. Removing an unknown id is a no-op.
    pub fn unsubscribe(&self, slug: &SpaceSlug, id: SubscriberId) {
        let mut spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = spaces.get_mut(slug) else {
            return;
        };
        if subscribers.remove(&id).is_some() {
            tracing::debug!(%slug, subscriber = %id, "subscriber removed");
        }
        if subscribers.is_empty() {
            spaces.remove(slug);
        }
    }

    /// Deliver `event` to every subscriber of `slug` except `exclude`.
    ///
    /// Subscribers whose sink fails are evicted before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Encode`] if the event cannot be serialized; no
    /// subscriber is touched in that case.
    pub fn publish(
        &self,
        slug: &SpaceSlug,
        event: &SseEvent,
        exclude: Option<SubscriberId>,
    ) -> Result<PublishReport, HubError> {
        let frame: Frame = serde_json::to_string(event)?.into();

        let targets: Vec<(SubscriberId, Arc<dyn EventSink>)> = self
            .spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|(id, _)| Some(**id) != exclude)
                    .map(|(id, sink)| (*id, Arc::clone(sink)))
                    .collect()
            })
            .unwrap_or_default();

        let mut dead = Vec::new();
        for (id, sink) in &targets {
            if let Err(error) = sink.deliver(&frame) {
                tracing::debug!(%slug, subscriber = %id, %error, "dropping dead subscriber");
                dead.push(*id);
            }
        }

        let report = PublishReport {
            delivered: targets.len().saturating_sub(dead.len()),
            evicted: dead.len(),
        };
        if !dead.is_empty() {
            let mut spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(subscribers) = spaces.get_mut(slug) {
                for id in &dead {
                    subscribers.remove(id);
                }
                if subscribers.is_empty() {
                    spaces.remove(slug);
                }
            }
        }

        self.counters.events_published.fetch_add(1, Ordering::Relaxed);
        self.counters
            .frames_delivered
            .fetch_add(widen(report.delivered), Ordering::Relaxed);
        self.counters
            .subscribers_evicted
            .fetch_add(widen(report.evicted), Ordering::Relaxed);
        tracing::debug!(
            %slug,
            event = event.name(),
            delivered = report.delivered,
            evicted = report.evicted,
            "event published"
        );
        Ok(report)
    }

    /// Number of subscribers currently registered for `slug`.
    pub fn subscriber_count(&self, slug: &SpaceSlug) -> usize {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .map_or(0, HashMap::len)
    }

    /// Whether `id` is registered under `slug`.
    pub fn is_subscribed(&self, slug: &SpaceSlug, id: SubscriberId) -> bool {
        self.spaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .is_some_and(|subscribers| subscribers.contains_key(&id))
    }

    /// Current counters.
    pub fn stats(&self) -> HubStats {
        let (live_subscribers, live_spaces) = {
            let spaces = self.spaces.lock().unwrap_or_else(PoisonError::into_inner);
            (spaces.values().map(HashMap::len).sum(), spaces.len())
        };
        HubStats {
            events_published: self.counters.events_published.load(Ordering::Relaxed),
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            subscribers_evicted: self.counters.subscribers_evicted.load(Ordering::Relaxed),
            live_subscribers,
            live_spaces,
        }
    }
}

/// A registered channel-backed stream. Unsubscribes on drop.
pub struct Subscription {
    id: SubscriberId,
    slug: SpaceSlug,
    rx: mpsc::Receiver<Frame>,
    hub: Arc<BroadcastHub>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("slug", &self.slug)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// The stream's subscriber id, as sent in the handshake.
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// The space this stream follows.
    pub const fn slug(&self) -> &SpaceSlug {
        &self.slug
    }

    /// Next frame, or `None` once the subscriber was evicted and its
    /// buffered frames are drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.slug, self.id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Records frames; fails every write once `broken` is set.
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<String>>,
        broken: std::sync::atomic::AtomicBool,
        attempts: AtomicUsize,
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, frame: &Frame) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if self.broken.load(Ordering::Relaxed) {
                return Err(SinkError::Closed);
            }
            self.frames.lock().unwrap().push(frame.to_string());
            Ok(())
        }
    }

    fn slug() -> SpaceSlug {
        "demo".parse().unwrap()
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = BroadcastHub::new();
        let sinks: Vec<Arc<RecordingSink>> = (0..3).map(|_| Arc::default()).collect();
        for sink in &sinks {
            hub.subscribe(&slug(), Arc::clone(sink) as Arc<dyn EventSink>);
        }

        let report = hub.publish(&slug(), &SseEvent::SpaceReset, None).unwrap();
        assert_eq!(report, PublishReport { delivered: 3, evicted: 0 });
        for sink in &sinks {
            assert_eq!(*sink.frames.lock().unwrap(), vec![r#"{"type":"space:reset"}"#]);
        }
    }

    #[test]
    fn publish_skips_excluded_subscriber() {
        let hub = BroadcastHub::new();
        let me = Arc::new(RecordingSink::default());
        let other = Arc::new(RecordingSink::default());
        let my_id = hub.subscribe(&slug(), Arc::clone(&me) as Arc<dyn EventSink>);
        hub.subscribe(&slug(), Arc::clone(&other) as Arc<dyn EventSink>);

        let report = hub.publish(&slug(), &SseEvent::SpaceReset, Some(my_id)).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(me.attempts.load(Ordering::Relaxed), 0);
        assert_eq!(other.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_sink_is_evicted_in_the_same_publish() {
        let hub = BroadcastHub::new();
        let healthy = Arc::new(RecordingSink::default());
        let faulty = Arc::new(RecordingSink::default());
        faulty.broken.store(true, Ordering::Relaxed);
        hub.subscribe(&slug(), Arc::clone(&healthy) as Arc<dyn EventSink>);
        let faulty_id = hub.subscribe(&slug(), Arc::clone(&faulty) as Arc<dyn EventSink>);

        let report = hub.publish(&slug(), &SseEvent::SpaceReset, None).unwrap();
        assert_eq!(report, PublishReport { delivered: 1, evicted: 1 });
        assert!(!hub.is_subscribed(&slug(), faulty_id));
        assert_eq!(hub.subscriber_count(&slug()), 1);

        hub.publish(&slug(), &SseEvent::SpaceReset, None).unwrap();
        assert_eq!(faulty.attempts.load(Ordering::Relaxed), 1);
        assert_eq!(hub.stats().subscribers_evicted, 1);
    }

    #[test]
    fn last_unsubscribe_drops_space() {
        let hub = BroadcastHub::new();
        let id = hub.subscribe(&slug(), Arc::new(RecordingSink::default()));
        assert_eq!(hub.stats().live_spaces, 1);

        hub.unsubscribe(&slug(), id);
        hub.unsubscribe(&slug(), id);
        assert_eq!(hub.stats().live_spaces, 0);
        assert_eq!(hub.stats().live_subscribers, 0);
    }

    #[test]
    fn publish_to_empty_space_is_a_no_op() {
        let hub = BroadcastHub::new();
        let report = hub.publish(&slug(), &SseEvent::SpaceReset, None).unwrap();
        assert_eq!(report, PublishReport::default());
        assert_eq!(hub.stats().events_published, 1);
    }

    #[tokio::test]
    async fn subscription_yields_handshake_first() {
        let hub = Arc::new(BroadcastHub::new());
        let mut sub = hub.open(&slug(), 8).unwrap();
        hub.publish(&slug(), &SseEvent::SpaceReset, None).unwrap();

        let first = sub.recv().await.unwrap();
        let handshake: Handshake = serde_json::from_str(&first).unwrap();
        assert_eq!(handshake.client_id, sub.id());
        assert_eq!(&*sub.recv().await.unwrap(), r#"{"type":"space:reset"}"#);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let hub = Arc::new(BroadcastHub::new());
        let sub = hub.open(&slug(), 8).unwrap();
        let id = sub.id();
        assert!(hub.is_subscribed(&slug(), id));
        drop(sub);
        assert!(!hub.is_subscribed(&slug(), id));
    }

    #[tokio::test]
    async fn full_buffer_evicts_and_ends_stream() {
        let hub = Arc::new(BroadcastHub::new());
        // Buffer of one is already filled by the handshake.
        let mut sub = hub.open(&slug(), 1).unwrap();
        let report = hub.publish(&slug(), &SseEvent::SpaceReset, None).unwrap();
        assert_eq!(report.evicted, 1);

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
