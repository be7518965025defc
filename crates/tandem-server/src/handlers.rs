//! REST endpoint handlers.
//!
//! Handlers are thin: they parse path segments into typed identifiers,
//! read the optional origin header, and hand the intent to the
//! [`Gateway`](tandem_core::gateway::Gateway). Every failure surfaces as an
//! [`ApiError`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/health` | Engine counters |
//! | `GET` | `/api/spaces/{slug}` | Space snapshot (items and cursors) |
//! | `POST` | `/api/spaces/{slug}/items` | Create an item |
//! | `PATCH` | `/api/spaces/{slug}/items/{item_id}` | Update an item |
//! | `DELETE` | `/api/spaces/{slug}/items/{item_id}` | Delete an item |
//! | `POST` | `/api/spaces/{slug}/reset` | Clear every item |
//! | `GET` | `/api/spaces/{slug}/cursors` | List cursors |
//! | `PUT` | `/api/spaces/{slug}/cursors` | Join or move a cursor |
//! | `DELETE` | `/api/spaces/{slug}/cursors/{client_id}` | Remove a cursor |

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use tandem_core::gateway::GatewayStats;
use tandem_types::{
    CanvasItem, ClientId, CursorPosition, ItemDraft, ItemId, ItemPatch, SpaceSlug, SpaceSnapshot,
    SubscriberId,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Header naming the event stream that issued an intent.
pub const ORIGIN_HEADER: &str = "x-tandem-subscriber";

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

fn parse_slug(raw: &str) -> Result<SpaceSlug, ApiError> {
    Ok(raw.parse()?)
}

fn parse_item_id(raw: &str) -> Result<ItemId, ApiError> {
    Ok(raw.parse()?)
}

/// The subscriber named by [`ORIGIN_HEADER`], if present.
fn origin(headers: &HeaderMap) -> Result<Option<SubscriberId>, ApiError> {
    let Some(value) = headers.get(ORIGIN_HEADER) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|e| ApiError::Validation(format!("{ORIGIN_HEADER}: {e}")))?;
    let uuid = Uuid::parse_str(text.trim())
        .map_err(|e| ApiError::Validation(format!("{ORIGIN_HEADER}: {e}")))?;
    Ok(Some(SubscriberId::from(uuid)))
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// Body of `GET /api/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server answers.
    pub status: &'static str,
    /// Store, presence and hub counters.
    #[serde(flatten)]
    pub stats: GatewayStats,
}

/// Body of `PUT /api/spaces/{slug}/cursors`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorAck {
    /// The cursor as stored.
    pub cursor: CursorPosition,
    /// Whether this call introduced the client to the space.
    pub is_new: bool,
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

/// Report engine counters.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: state.gateway.stats(),
    })
}

// ---------------------------------------------------------------------------
// Spaces
// ---------------------------------------------------------------------------

/// Return the space (creating it on first reference) with its cursors.
pub async fn get_space(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<SpaceSnapshot>, ApiError> {
    let slug = parse_slug(&slug)?;
    Ok(Json(state.gateway.space_snapshot(&slug)))
}

/// Clear every item in the space.
pub async fn reset_space(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    let slug = parse_slug(&slug)?;
    state.gateway.reset_space(&slug)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Create an item from a draft.
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    body: Result<Json<ItemDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<CanvasItem>), ApiError> {
    let slug = parse_slug(&slug)?;
    let Json(draft) = body?;
    let item = state.gateway.create_item(&slug, draft)?;
    tracing::debug!(%slug, item_id = %item.id, item_type = %item.item_type(), "item created");
    Ok((StatusCode::CREATED, Json(item)))
}

/// Merge a partial update into an item.
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Path((slug, item_id)): Path<(String, String)>,
    body: Result<Json<ItemPatch>, JsonRejection>,
) -> Result<Json<CanvasItem>, ApiError> {
    let slug = parse_slug(&slug)?;
    let item_id = parse_item_id(&item_id)?;
    let Json(patch) = body?;
    let item = state.gateway.update_item(&slug, &item_id, &patch)?;
    Ok(Json(item))
}

/// Delete an item.
pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Path((slug, item_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let slug = parse_slug(&slug)?;
    let item_id = parse_item_id(&item_id)?;
    state.gateway.delete_item(&slug, &item_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

/// List the cursors currently in the space.
pub async fn list_cursors(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<CursorPosition>>, ApiError> {
    let slug = parse_slug(&slug)?;
    Ok(Json(state.gateway.list_cursors(&slug)))
}

/// Record a cursor position. The stream named by [`ORIGIN_HEADER`] does
/// not receive the resulting event.
pub async fn upsert_cursor(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Result<Json<CursorPosition>, JsonRejection>,
) -> Result<Json<CursorAck>, ApiError> {
    let slug = parse_slug(&slug)?;
    let origin = origin(&headers)?;
    let Json(cursor) = body?;
    let upsert = state.gateway.upsert_cursor(&slug, cursor, origin)?;
    Ok(Json(CursorAck {
        cursor: upsert.cursor,
        is_new: upsert.is_new,
    }))
}

/// Remove a cursor. Removing an unknown cursor succeeds without effect.
pub async fn remove_cursor(
    State(state): State<Arc<AppState>>,
    Path((slug, client_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let slug = parse_slug(&slug)?;
    let client_id: ClientId = client_id.parse()?;
    let origin = origin(&headers)?;
    if state
        .gateway
        .remove_cursor(&slug, &client_id, origin)
        .is_none()
    {
        tracing::debug!(%slug, %client_id, "leave for unknown cursor");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn missing_origin_header_is_none() {
        assert_eq!(origin(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn origin_header_parses_uuid() {
        let id = SubscriberId::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            ORIGIN_HEADER,
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        assert_eq!(origin(&headers).unwrap(), Some(id));
    }

    #[test]
    fn malformed_origin_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN_HEADER, HeaderValue::from_static("tab-1"));
        assert!(matches!(origin(&headers), Err(ApiError::Validation(_))));
    }
}
