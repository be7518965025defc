//! End-to-end scenarios for the client protocol against a live gateway.
//!
//! Client state machines run against a real [`Gateway`] and read their
//! events through the same framing the HTTP layer emits, with time driven
//! explicitly.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::time::{Duration, Instant};

use tandem_client::{
    ReconcileConfig, Reconciler, RemoteOutcome, SseDecoder, WriteCoalescer,
};
use tandem_core::gateway::Gateway;
use tandem_core::hub::Subscription;
use tandem_types::{ItemDraft, ItemId, ItemKind, ItemPatch, ServerFrame, SpaceSlug, SseEvent};

fn demo() -> SpaceSlug {
    "demo".parse().unwrap()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Drain a subscription through the wire framing and the decoder.
fn receive(sub: &mut Subscription, decoder: &mut SseDecoder) -> Vec<SseEvent> {
    let wire: String = std::iter::from_fn(|| sub.try_recv())
        .map(|frame| format!("data: {frame}\n\n"))
        .collect();
    decoder
        .push(wire.as_bytes())
        .into_iter()
        .filter_map(|frame| match frame.unwrap() {
            ServerFrame::Event(event) => Some(event),
            ServerFrame::Connected(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn drag_burst_reaches_server_as_one_update() {
    let gateway = Gateway::new();
    let mut observer = gateway.open_subscription(&demo()).unwrap();
    let mut decoder = SseDecoder::new();
    let config = ReconcileConfig::default();
    let mut client_a = Reconciler::new(config);
    let mut coalescer = WriteCoalescer::new(config.coalesce_interval);
    let id: ItemId = "s1".parse().unwrap();
    let start = Instant::now();

    let created = gateway
        .create_item(
            &demo(),
            ItemDraft::new(ItemKind::Sticky, 100.0, 100.0).with_id(id.clone()),
        )
        .unwrap();
    client_a.apply_remote(SseEvent::ItemCreated { item: created }, start);

    for (offset, x) in [(10, 101.0), (40, 110.0), (70, 120.0)] {
        let now = start + ms(offset);
        let patch = ItemPatch::position(x, 100.0);
        client_a.update_local(&id, &patch, now).unwrap();
        assert!(coalescer.push(&id, patch, now).is_none());
        for (item_id, patch) in coalescer.poll(now) {
            gateway.update_item(&demo(), &item_id, &patch).unwrap();
        }
    }
    for (item_id, patch) in coalescer.poll(start + ms(110)) {
        gateway.update_item(&demo(), &item_id, &patch).unwrap();
    }

    let updates: Vec<_> = receive(&mut observer, &mut decoder)
        .into_iter()
        .filter_map(|event| match event {
            SseEvent::ItemUpdated { item } => Some(item),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 1);
    let landed = updates.first().unwrap();
    assert_eq!(landed.x.to_bits(), 120.0_f64.to_bits());
    assert_eq!(landed.y.to_bits(), 100.0_f64.to_bits());

    // The echo arrives while the drag is still fresh and is not applied.
    let echo = SseEvent::ItemUpdated {
        item: landed.clone(),
    };
    assert_eq!(
        client_a.apply_remote(echo, start + ms(120)),
        RemoteOutcome::Stale
    );
}

#[tokio::test]
async fn create_echo_is_not_duplicated_on_the_creator() {
    let gateway = Gateway::new();
    let mut stream_a = gateway.open_subscription(&demo()).unwrap();
    let mut stream_b = gateway.open_subscription(&demo()).unwrap();
    let (mut decoder_a, mut decoder_b) = (SseDecoder::new(), SseDecoder::new());
    let mut client_a = Reconciler::default();
    let mut client_b = Reconciler::default();
    let now = Instant::now();

    let local = ItemDraft::new(ItemKind::Sticky, 100.0, 100.0)
        .into_item("s1".parse().unwrap(), chrono::Utc::now());
    let draft = client_a.create_local(local, now).unwrap();
    gateway.create_item(&demo(), draft).unwrap();

    let outcomes_a: Vec<_> = receive(&mut stream_a, &mut decoder_a)
        .into_iter()
        .map(|event| client_a.apply_remote(event, now))
        .collect();
    let outcomes_b: Vec<_> = receive(&mut stream_b, &mut decoder_b)
        .into_iter()
        .map(|event| client_b.apply_remote(event, now))
        .collect();

    assert_eq!(outcomes_a, [RemoteOutcome::SelfEcho]);
    assert_eq!(outcomes_b, [RemoteOutcome::Applied]);
    assert_eq!(client_a.items().len(), 1);
    assert_eq!(client_b.items().len(), 1);
}

#[tokio::test]
async fn rejected_write_rolls_back() {
    let gateway = Gateway::new();
    let mut client = Reconciler::default();
    let now = Instant::now();
    let id: ItemId = "s1".parse().unwrap();
    let created = gateway
        .create_item(
            &demo(),
            ItemDraft::new(ItemKind::Sticky, 0.0, 0.0).with_id(id.clone()),
        )
        .unwrap();
    client.apply_remote(SseEvent::ItemCreated { item: created }, now);

    // Another client deletes it before our move lands.
    gateway.delete_item(&demo(), &id).unwrap();
    let patch = ItemPatch::position(5.0, 5.0);
    client.update_local(&id, &patch, now).unwrap();

    let result = gateway.update_item(&demo(), &id, &patch);
    assert!(result.is_err());
    assert!(client.rollback(&id));
    assert_eq!(client.item(&id).unwrap().x.to_bits(), 0.0_f64.to_bits());
}
