//! Axum router construction for the Tandem API.
//!
//! Assembles the REST intent routes and the per-space event stream into a
//! single [`Router`] with open CORS, so canvas pages on any origin can
//! talk to the engine.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, sse};

/// Build the complete Axum router.
///
/// - `GET /api/health` -- engine counters
/// - `GET /api/spaces/{slug}` -- space snapshot, created on first reference
/// - `POST /api/spaces/{slug}/items` -- create an item
/// - `PATCH /api/spaces/{slug}/items/{item_id}` -- update an item
/// - `DELETE /api/spaces/{slug}/items/{item_id}` -- delete an item
/// - `POST /api/spaces/{slug}/reset` -- clear every item
/// - `GET /api/spaces/{slug}/cursors` -- list cursors
/// - `PUT /api/spaces/{slug}/cursors` -- move or join a cursor
/// - `DELETE /api/spaces/{slug}/cursors/{client_id}` -- remove a cursor
/// - `GET /api/spaces/{slug}/events` -- server-sent event stream
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        // Spaces
        .route("/api/spaces/{slug}", get(handlers::get_space))
        .route("/api/spaces/{slug}/reset", post(handlers::reset_space))
        // Items
        .route("/api/spaces/{slug}/items", post(handlers::create_item))
        .route(
            "/api/spaces/{slug}/items/{item_id}",
            patch(handlers::update_item).delete(handlers::delete_item),
        )
        // Cursors
        .route(
            "/api/spaces/{slug}/cursors",
            get(handlers::list_cursors).put(handlers::upsert_cursor),
        )
        .route(
            "/api/spaces/{slug}/cursors/{client_id}",
            delete(handlers::remove_cursor),
        )
        // Event stream
        .route("/api/spaces/{slug}/events", get(sse::space_events))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
