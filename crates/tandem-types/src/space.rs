//! Space records and the snapshot clients load on join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cursor::CursorPosition;
use crate::ids::{ItemId, SpaceId, SpaceSlug};
use crate::item::CanvasItem;

/// A named shared canvas and its items, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Space {
    /// Stable identity of the record; survives resets.
    pub id: SpaceId,
    /// Unique URL-safe name.
    pub slug: SpaceSlug,
    /// Items ordered by creation.
    pub items: Vec<CanvasItem>,
    /// When the space was first opened.
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation.
    pub updated_at: DateTime<Utc>,
}

impl Space {
    /// Look up an item by id.
    pub fn item(&self, id: &ItemId) -> Option<&CanvasItem> {
        self.items.iter().find(|item| &item.id == id)
    }
}

/// Everything a joining client needs to render a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SpaceSnapshot {
    /// The space with all of its items.
    pub space: Space,
    /// Currently known cursors.
    pub cursors: Vec<CursorPosition>,
}
