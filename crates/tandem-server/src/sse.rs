//! Server-sent event stream for one space.
//!
//! Clients connect to `GET /api/spaces/{slug}/events` and receive one
//! `data: <json>` frame per event. The first frame is always the
//! `connected` handshake carrying the subscriber id the client should send
//! back in the `x-tandem-subscriber` header. When the client disconnects,
//! Axum drops the stream, which drops the [`Subscription`] and removes the
//! subscriber from the hub.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tandem_core::hub::Subscription;
use tandem_types::SpaceSlug;

use crate::error::ApiError;
use crate::state::AppState;

/// Open an event stream on a space.
///
/// # Route
///
/// `GET /api/spaces/{slug}/events`
pub async fn space_events(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let slug: SpaceSlug = slug.parse()?;
    let subscription = state.gateway.open_subscription(&slug)?;
    Ok(Sse::new(frames(subscription)).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}

/// Forward every frame of `subscription` until the hub drops it.
fn frames(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(subscription, |mut subscription| async move {
        let Some(frame) = subscription.recv().await else {
            tracing::debug!(
                slug = %subscription.slug(),
                subscriber = %subscription.id(),
                "stream closed by hub"
            );
            return None;
        };
        Some((Ok(Event::default().data(&*frame)), subscription))
    })
}
