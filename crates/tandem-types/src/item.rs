//! Canvas items and their per-variant payloads.
//!
//! A [`CanvasItem`] carries the fields every item shares (position, size,
//! content, color, stacking order, timestamps) plus an [`ItemKind`] that
//! holds the variant-specific payload. On the wire the kind is flattened
//! into the item, so a sticky note is `{"id": "s1", "type": "sticky", ...}`
//! and a drawing additionally carries `points`, `strokeColor` and
//! `strokeWidth`.
//!
//! Clients submit an [`ItemDraft`] to create an item and an [`ItemPatch`]
//! to update one. Patches are partial: only the fields present are merged,
//! and a variant field that does not belong to the item's type is
//! rejected instead of silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use validator::Validate;

use crate::ids::ItemId;
use crate::validate::{InvalidPayload, extent, finite};

/// Maximum rows or columns in a table item.
const MAX_TABLE_DIM: u32 = 100;

/// Maximum number of points in a single drawing stroke.
const MAX_DRAWING_POINTS: usize = 20_000;

/// Maximum length of a URL-like field (`src`, `url`).
const MAX_URL_LEN: usize = 2048;

// ---------------------------------------------------------------------------
// Variant payload building blocks
// ---------------------------------------------------------------------------

/// A point in canvas (world) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Discriminant of [`ItemKind`], used in patches and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ItemType {
    /// Sticky note.
    Sticky,
    /// Free text block.
    Text,
    /// Geometric shape.
    Shape,
    /// Embedded image.
    Image,
    /// Single emoji stamp.
    Emoji,
    /// Freehand drawing stroke.
    Drawing,
    /// Link preview card.
    Link,
    /// Grid of text cells.
    Table,
    /// Line between two points or items.
    Connector,
}

impl ItemType {
    /// Wire name of the type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sticky => "sticky",
            Self::Text => "text",
            Self::Shape => "shape",
            Self::Image => "image",
            Self::Emoji => "emoji",
            Self::Drawing => "drawing",
            Self::Link => "link",
            Self::Table => "table",
            Self::Connector => "connector",
        }
    }
}

impl core::fmt::Display for ItemType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outline of a shape item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ShapeType {
    /// Axis-aligned rectangle.
    Rectangle,
    /// Circle inscribed in the bounding box.
    Circle,
    /// Ellipse filling the bounding box.
    Ellipse,
    /// Isosceles triangle.
    Triangle,
    /// Rhombus.
    Diamond,
    /// Five-pointed star.
    Star,
    /// Regular hexagon.
    Hexagon,
    /// Block arrow.
    Arrow,
}

/// Routing style of a connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ConnectorType {
    /// Direct line.
    #[default]
    Straight,
    /// Right-angled segments.
    Elbow,
    /// Bezier curve.
    Curved,
}

/// One end of a connector.
///
/// When `item_id` is set the end is anchored to that item and the client
/// re-derives the coordinates whenever the item moves; `x`/`y` hold the
/// last rendered position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConnectorEnd {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
    /// Item this end is anchored to, if any.
    #[serde(rename = "itemId")]
    pub item_id: Option<ItemId>,
}

impl ConnectorEnd {
    /// A free-floating end at the given coordinates.
    pub const fn free(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            item_id: None,
        }
    }
}

/// A single table cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TableCell {
    /// Cell text.
    #[serde(default)]
    pub value: String,
}

// ---------------------------------------------------------------------------
// ItemKind
// ---------------------------------------------------------------------------

/// Variant-specific payload of a canvas item, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ItemKind {
    /// Sticky note; its text lives in the item's `content`.
    Sticky,
    /// Free text block; its text lives in the item's `content`.
    Text,
    /// Geometric shape.
    Shape {
        /// Outline to draw.
        #[serde(rename = "shapeType")]
        shape_type: ShapeType,
    },
    /// Embedded image.
    Image {
        /// Image URL.
        src: Option<String>,
    },
    /// Emoji stamp; the emoji itself lives in the item's `content`.
    Emoji,
    /// Freehand stroke.
    Drawing {
        /// Ordered stroke points.
        #[serde(default)]
        points: Vec<Point>,
        /// Stroke color.
        #[serde(rename = "strokeColor")]
        stroke_color: Option<String>,
        /// Stroke width in canvas units.
        #[serde(rename = "strokeWidth")]
        stroke_width: Option<f64>,
    },
    /// Link card.
    Link {
        /// Target URL.
        url: Option<String>,
    },
    /// Grid of cells, `rows` by `cols`.
    Table {
        /// Cells in row-major order.
        #[serde(default)]
        cells: Vec<Vec<TableCell>>,
        /// Number of rows.
        rows: u32,
        /// Number of columns.
        cols: u32,
    },
    /// Line between two ends.
    Connector {
        /// Start of the line.
        #[serde(rename = "startPoint")]
        start_point: ConnectorEnd,
        /// End of the line.
        #[serde(rename = "endPoint")]
        end_point: ConnectorEnd,
        /// Routing style.
        #[serde(rename = "connectorType")]
        #[serde(default)]
        connector_type: ConnectorType,
        /// Arrow head at the start.
        #[serde(rename = "startArrow")]
        #[serde(default)]
        start_arrow: bool,
        /// Arrow head at the end.
        #[serde(rename = "endArrow")]
        #[serde(default)]
        end_arrow: bool,
    },
}

impl ItemKind {
    /// The discriminant of this payload.
    pub const fn item_type(&self) -> ItemType {
        match self {
            Self::Sticky => ItemType::Sticky,
            Self::Text => ItemType::Text,
            Self::Shape { .. } => ItemType::Shape,
            Self::Image { .. } => ItemType::Image,
            Self::Emoji => ItemType::Emoji,
            Self::Drawing { .. } => ItemType::Drawing,
            Self::Link { .. } => ItemType::Link,
            Self::Table { .. } => ItemType::Table,
            Self::Connector { .. } => ItemType::Connector,
        }
    }

    /// Validate the payload's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPayload`] describing the first violated rule.
    pub fn check(&self) -> Result<(), InvalidPayload> {
        match self {
            Self::Sticky | Self::Text | Self::Emoji | Self::Shape { .. } => Ok(()),
            Self::Image { src } => check_url("src", src.as_deref()),
            Self::Link { url } => check_url("url", url.as_deref()),
            Self::Drawing {
                points,
                stroke_width,
                ..
            } => {
                if points.len() > MAX_DRAWING_POINTS {
                    return Err(InvalidPayload::new(format!(
                        "drawing has {} points, limit is {MAX_DRAWING_POINTS}",
                        points.len()
                    )));
                }
                if !points.iter().all(|p| p.is_finite()) {
                    return Err(InvalidPayload::new("drawing points must be finite"));
                }
                if stroke_width.is_some_and(|w| !w.is_finite() || w < 0.0) {
                    return Err(InvalidPayload::new("strokeWidth must be finite and >= 0"));
                }
                Ok(())
            }
            Self::Table { cells, rows, cols } => {
                if *rows > MAX_TABLE_DIM || *cols > MAX_TABLE_DIM {
                    return Err(InvalidPayload::new(format!(
                        "table is {rows}x{cols}, limit is {MAX_TABLE_DIM}x{MAX_TABLE_DIM}"
                    )));
                }
                // An empty grid means the client has not materialized cells yet.
                if cells.is_empty() {
                    return Ok(());
                }
                let rows_match = usize::try_from(*rows).is_ok_and(|r| r == cells.len());
                let cols_match = usize::try_from(*cols)
                    .is_ok_and(|c| cells.iter().all(|row| row.len() == c));
                if rows_match && cols_match {
                    Ok(())
                } else {
                    Err(InvalidPayload::new(format!(
                        "table cells do not form a {rows}x{cols} grid"
                    )))
                }
            }
            Self::Connector {
                start_point,
                end_point,
                ..
            } => {
                let ends = [start_point, end_point];
                if ends.iter().all(|e| e.x.is_finite() && e.y.is_finite()) {
                    Ok(())
                } else {
                    Err(InvalidPayload::new("connector ends must be finite"))
                }
            }
        }
    }

    /// Merge the variant fields present in `patch` into this payload.
    ///
    /// Fields belonging to other variants are ignored here; callers reject
    /// them up front with [`ItemPatch::foreign_field`].
    fn apply(&mut self, patch: &ItemPatch) {
        match self {
            Self::Sticky | Self::Text | Self::Emoji => {}
            Self::Shape { shape_type } => {
                if let Some(shape) = patch.shape_type {
                    *shape_type = shape;
                }
            }
            Self::Image { src } => {
                if patch.src.is_some() {
                    src.clone_from(&patch.src);
                }
            }
            Self::Drawing {
                points,
                stroke_color,
                stroke_width,
            } => {
                if let Some(new_points) = &patch.points {
                    points.clone_from(new_points);
                }
                if patch.stroke_color.is_some() {
                    stroke_color.clone_from(&patch.stroke_color);
                }
                if patch.stroke_width.is_some() {
                    *stroke_width = patch.stroke_width;
                }
            }
            Self::Link { url } => {
                if patch.url.is_some() {
                    url.clone_from(&patch.url);
                }
            }
            Self::Table { cells, rows, cols } => {
                if let Some(new_cells) = &patch.cells {
                    cells.clone_from(new_cells);
                }
                if let Some(r) = patch.rows {
                    *rows = r;
                }
                if let Some(c) = patch.cols {
                    *cols = c;
                }
            }
            Self::Connector {
                start_point,
                end_point,
                connector_type,
                start_arrow,
                end_arrow,
            } => {
                if let Some(start) = &patch.start_point {
                    start_point.clone_from(start);
                }
                if let Some(end) = &patch.end_point {
                    end_point.clone_from(end);
                }
                if let Some(kind) = patch.connector_type {
                    *connector_type = kind;
                }
                if let Some(arrow) = patch.start_arrow {
                    *start_arrow = arrow;
                }
                if let Some(arrow) = patch.end_arrow {
                    *end_arrow = arrow;
                }
            }
        }
    }
}

fn check_url(field: &str, value: Option<&str>) -> Result<(), InvalidPayload> {
    match value {
        Some(v) if v.len() > MAX_URL_LEN => Err(InvalidPayload::new(format!(
            "{field} exceeds {MAX_URL_LEN} bytes"
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// CanvasItem
// ---------------------------------------------------------------------------

/// One placed object on a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CanvasItem {
    /// Unique within the owning space, never reused.
    pub id: ItemId,
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Width, when the item has an explicit size.
    pub width: Option<f64>,
    /// Height, when the item has an explicit size.
    pub height: Option<f64>,
    /// Text content (sticky/text body, emoji, link title, ...).
    pub content: Option<String>,
    /// Fill or text color.
    pub color: Option<String>,
    /// Stacking order; higher draws on top.
    #[serde(default)]
    pub z_index: i32,
    /// Display name of the creator, if the client supplied one.
    pub created_by: Option<String>,
    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
    /// Server-assigned time of the last mutation.
    pub updated_at: DateTime<Utc>,
    /// Variant-specific payload, flattened into the item on the wire.
    #[serde(flatten)]
    pub kind: ItemKind,
}

impl CanvasItem {
    /// The item's variant.
    pub const fn item_type(&self) -> ItemType {
        self.kind.item_type()
    }

    /// Merge `patch` into this item.
    ///
    /// Only fields present in the patch change; everything else, including
    /// the timestamps, is left alone (the store stamps `updated_at`). On
    /// error the item is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPayload`] if the patch fails validation, names a
    /// different `type`, or carries a field of another variant.
    pub fn apply_patch(&mut self, patch: &ItemPatch) -> Result<(), InvalidPayload> {
        patch.check()?;

        let own_type = self.item_type();
        if let Some(requested) = patch.item_type
            && requested != own_type
        {
            return Err(InvalidPayload::new(format!(
                "cannot change item type from {own_type} to {requested}"
            )));
        }
        if let Some(field) = patch.foreign_field(own_type) {
            return Err(InvalidPayload::new(format!(
                "field `{field}` does not apply to {own_type} items"
            )));
        }

        let mut next = self.clone();
        if let Some(x) = patch.x {
            next.x = x;
        }
        if let Some(y) = patch.y {
            next.y = y;
        }
        if patch.width.is_some() {
            next.width = patch.width;
        }
        if patch.height.is_some() {
            next.height = patch.height;
        }
        if patch.content.is_some() {
            next.content.clone_from(&patch.content);
        }
        if patch.color.is_some() {
            next.color.clone_from(&patch.color);
        }
        if let Some(z) = patch.z_index {
            next.z_index = z;
        }
        next.kind.apply(patch);
        next.kind.check()?;

        *self = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ItemDraft
// ---------------------------------------------------------------------------

/// Client request to create an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, Validate)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ItemDraft {
    /// Client-chosen id; the server mints one when absent.
    pub id: Option<ItemId>,
    /// Horizontal position.
    #[validate(custom(function = "finite"))]
    pub x: f64,
    /// Vertical position.
    #[validate(custom(function = "finite"))]
    pub y: f64,
    /// Width.
    #[validate(custom(function = "extent"))]
    pub width: Option<f64>,
    /// Height.
    #[validate(custom(function = "extent"))]
    pub height: Option<f64>,
    /// Text content.
    #[validate(length(max = 10_000))]
    pub content: Option<String>,
    /// Fill or text color.
    #[validate(length(max = 64))]
    pub color: Option<String>,
    /// Stacking order, 0 when absent.
    pub z_index: Option<i32>,
    /// Display name of the creator.
    #[validate(length(max = 128))]
    pub created_by: Option<String>,
    /// Variant-specific payload.
    #[serde(flatten)]
    pub kind: ItemKind,
}

impl ItemDraft {
    /// A draft of the given kind at `(x, y)` with every optional field empty.
    pub const fn new(kind: ItemKind, x: f64, y: f64) -> Self {
        Self {
            id: None,
            x,
            y,
            width: None,
            height: None,
            content: None,
            color: None,
            z_index: None,
            created_by: None,
            kind,
        }
    }

    /// Set a client-chosen id.
    #[must_use]
    pub fn with_id(mut self, id: ItemId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the text content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Validate field bounds and the variant payload.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPayload`] describing the violated rules.
    pub fn check(&self) -> Result<(), InvalidPayload> {
        self.validate()?;
        self.kind.check()
    }

    /// Turn the draft into a stored item with the given id and timestamp.
    pub fn into_item(self, id: ItemId, now: DateTime<Utc>) -> CanvasItem {
        CanvasItem {
            id,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            content: self.content,
            color: self.color,
            z_index: self.z_index.unwrap_or(0),
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
            kind: self.kind,
        }
    }
}

// ---------------------------------------------------------------------------
// ItemPatch
// ---------------------------------------------------------------------------

/// Partial update of an item. Absent (or `null`) fields are left unchanged.
///
/// Identity fields a client may echo back when sending a whole object
/// (`id`, `createdAt`, `updatedAt`, `createdBy`) are not part of the patch
/// and are ignored during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS, Validate)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ItemPatch {
    /// Must match the item's current type when present.
    #[serde(rename = "type")]
    pub item_type: Option<ItemType>,
    /// New horizontal position.
    #[validate(custom(function = "finite"))]
    pub x: Option<f64>,
    /// New vertical position.
    #[validate(custom(function = "finite"))]
    pub y: Option<f64>,
    /// New width.
    #[validate(custom(function = "extent"))]
    pub width: Option<f64>,
    /// New height.
    #[validate(custom(function = "extent"))]
    pub height: Option<f64>,
    /// New text content.
    #[validate(length(max = 10_000))]
    pub content: Option<String>,
    /// New color.
    #[validate(length(max = 64))]
    pub color: Option<String>,
    /// New stacking order.
    pub z_index: Option<i32>,
    /// Shape outline (shape items).
    pub shape_type: Option<ShapeType>,
    /// Image URL (image items).
    #[validate(length(max = 2048))]
    pub src: Option<String>,
    /// Stroke points (drawing items).
    pub points: Option<Vec<Point>>,
    /// Stroke color (drawing items).
    #[validate(length(max = 64))]
    pub stroke_color: Option<String>,
    /// Stroke width (drawing items).
    #[validate(custom(function = "extent"))]
    pub stroke_width: Option<f64>,
    /// Link URL (link items).
    #[validate(length(max = 2048))]
    pub url: Option<String>,
    /// Cell grid (table items).
    pub cells: Option<Vec<Vec<TableCell>>>,
    /// Row count (table items).
    pub rows: Option<u32>,
    /// Column count (table items).
    pub cols: Option<u32>,
    /// Start end (connector items).
    pub start_point: Option<ConnectorEnd>,
    /// Finish end (connector items).
    pub end_point: Option<ConnectorEnd>,
    /// Routing style (connector items).
    pub connector_type: Option<ConnectorType>,
    /// Start arrow head (connector items).
    pub start_arrow: Option<bool>,
    /// End arrow head (connector items).
    pub end_arrow: Option<bool>,
}

/// Overwrite `$field` on `$self` with `$newer`'s value when present.
macro_rules! take_newer {
    ($self:ident, $newer:ident; $($field:ident),+ $(,)?) => {
        $(
            if $newer.$field.is_some() {
                $self.$field = $newer.$field;
            }
        )+
    };
}

impl ItemPatch {
    /// A patch that only moves the item.
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// Validate field bounds.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPayload`] describing the violated rules.
    pub fn check(&self) -> Result<(), InvalidPayload> {
        self.validate()?;
        if let Some(points) = &self.points
            && !points.iter().all(|p| p.is_finite())
        {
            return Err(InvalidPayload::new("drawing points must be finite"));
        }
        Ok(())
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the patch touches `x` or `y`.
    pub const fn has_position(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    /// Fold a newer patch into this one; the newer value wins per field.
    pub fn merge(&mut self, newer: Self) {
        take_newer!(self, newer;
            item_type, x, y, width, height, content, color, z_index,
            shape_type, src, points, stroke_color, stroke_width, url,
            cells, rows, cols, start_point, end_point, connector_type,
            start_arrow, end_arrow,
        );
    }

    /// Split into the positional part (`x`/`y`) and everything else.
    /// Either side is `None` when it would be empty.
    pub fn split_position(mut self) -> (Option<Self>, Option<Self>) {
        let positional = Self {
            x: self.x.take(),
            y: self.y.take(),
            ..Self::default()
        };
        let positional = (!positional.is_empty()).then_some(positional);
        let rest = (!self.is_empty()).then_some(self);
        (positional, rest)
    }

    /// First variant-specific field present in the patch that does not
    /// belong to `item_type`, by wire name.
    pub fn foreign_field(&self, item_type: ItemType) -> Option<&'static str> {
        let variant_fields: [(&'static str, bool, ItemType); 14] = [
            ("shapeType", self.shape_type.is_some(), ItemType::Shape),
            ("src", self.src.is_some(), ItemType::Image),
            ("points", self.points.is_some(), ItemType::Drawing),
            ("strokeColor", self.stroke_color.is_some(), ItemType::Drawing),
            ("strokeWidth", self.stroke_width.is_some(), ItemType::Drawing),
            ("url", self.url.is_some(), ItemType::Link),
            ("cells", self.cells.is_some(), ItemType::Table),
            ("rows", self.rows.is_some(), ItemType::Table),
            ("cols", self.cols.is_some(), ItemType::Table),
            ("startPoint", self.start_point.is_some(), ItemType::Connector),
            ("endPoint", self.end_point.is_some(), ItemType::Connector),
            ("connectorType", self.connector_type.is_some(), ItemType::Connector),
            ("startArrow", self.start_arrow.is_some(), ItemType::Connector),
            ("endArrow", self.end_arrow.is_some(), ItemType::Connector),
        ];
        variant_fields
            .into_iter()
            .find(|(_, present, owner)| *present && *owner != item_type)
            .map(|(name, _, _)| name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sticky() -> CanvasItem {
        ItemDraft::new(ItemKind::Sticky, 100.0, 100.0)
            .with_content("hello")
            .into_item("s1".parse().unwrap(), Utc::now())
    }

    fn table(rows: u32, cols: u32) -> ItemKind {
        let cells = (0..rows)
            .map(|_| (0..cols).map(|_| TableCell::default()).collect())
            .collect();
        ItemKind::Table { cells, rows, cols }
    }

    #[test]
    fn sticky_wire_format_flattens_type() {
        let json = serde_json::to_value(sticky()).unwrap();
        assert_eq!(json["type"], "sticky");
        assert_eq!(json["id"], "s1");
        assert_eq!(json["x"], 100.0);
        assert_eq!(json["zIndex"], 0);
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn draft_parses_variant_payload() {
        let json = r#"{
            "type": "connector",
            "x": 0, "y": 0,
            "startPoint": {"x": 1, "y": 2, "itemId": "a"},
            "endPoint": {"x": 3, "y": 4},
            "connectorType": "elbow",
            "endArrow": true
        }"#;
        let draft: ItemDraft = serde_json::from_str(json).unwrap();
        match draft.kind {
            ItemKind::Connector {
                start_point,
                end_point,
                connector_type,
                start_arrow,
                end_arrow,
            } => {
                assert_eq!(start_point.item_id.unwrap().as_str(), "a");
                assert!(end_point.item_id.is_none());
                assert_eq!(connector_type, ConnectorType::Elbow);
                assert!(!start_arrow);
                assert!(end_arrow);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn draft_requires_position() {
        let missing_y = r#"{"type": "sticky", "x": 1}"#;
        assert!(serde_json::from_str::<ItemDraft>(missing_y).is_err());
    }

    #[test]
    fn draft_rejects_unknown_type() {
        let json = r#"{"type": "hologram", "x": 1, "y": 2}"#;
        assert!(serde_json::from_str::<ItemDraft>(json).is_err());
    }

    #[test]
    fn draft_check_rejects_non_finite_and_bad_tables() {
        let draft = ItemDraft::new(ItemKind::Sticky, f64::NAN, 0.0);
        assert!(draft.check().is_err());

        let mut ragged = table(2, 2);
        if let ItemKind::Table { cells, .. } = &mut ragged
            && let Some(row) = cells.get_mut(1)
        {
            row.pop();
        }
        assert!(ItemDraft::new(ragged, 0.0, 0.0).check().is_err());
        assert!(ItemDraft::new(table(2, 3), 0.0, 0.0).check().is_ok());
    }

    #[test]
    fn position_patch_leaves_other_fields() {
        let mut item = sticky();
        let before = item.clone();
        item.apply_patch(&ItemPatch {
            x: Some(5.0),
            ..ItemPatch::default()
        })
        .unwrap();

        assert!((item.x - 5.0).abs() < f64::EPSILON);
        assert_eq!(
            CanvasItem {
                x: before.x,
                ..item.clone()
            },
            before
        );
    }

    #[test]
    fn patch_rejects_type_change_and_foreign_fields() {
        let mut item = sticky();
        let before = item.clone();

        let retype = ItemPatch {
            item_type: Some(ItemType::Text),
            ..ItemPatch::default()
        };
        assert!(item.apply_patch(&retype).is_err());

        let foreign = ItemPatch {
            x: Some(1.0),
            rows: Some(3),
            ..ItemPatch::default()
        };
        let err = item.apply_patch(&foreign).unwrap_err();
        assert!(err.0.contains("rows"));
        assert_eq!(item, before);
    }

    #[test]
    fn patch_updates_variant_payload() {
        let mut item = ItemDraft::new(
            ItemKind::Drawing {
                points: vec![Point::new(0.0, 0.0)],
                stroke_color: Some("#000".into()),
                stroke_width: Some(2.0),
            },
            0.0,
            0.0,
        )
        .into_item(ItemId::generate(), Utc::now());

        let patch: ItemPatch =
            serde_json::from_str(r#"{"type":"drawing","points":[{"x":1,"y":1},{"x":2,"y":2}]}"#)
                .unwrap();
        item.apply_patch(&patch).unwrap();

        match &item.kind {
            ItemKind::Drawing {
                points,
                stroke_color,
                ..
            } => {
                assert_eq!(points.len(), 2);
                assert_eq!(stroke_color.as_deref(), Some("#000"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn whole_object_patch_ignores_identity_fields() {
        let item = sticky();
        let mut json = serde_json::to_value(&item).unwrap();
        json["id"] = "other".into();
        json["content"] = "edited".into();
        let patch: ItemPatch = serde_json::from_value(json).unwrap();

        let mut target = item.clone();
        target.apply_patch(&patch).unwrap();
        assert_eq!(target.id, item.id);
        assert_eq!(target.content.as_deref(), Some("edited"));
    }

    #[test]
    fn merge_keeps_latest_values() {
        let mut pending = ItemPatch::position(101.0, 100.0);
        pending.merge(ItemPatch::position(110.0, 100.0));
        pending.merge(ItemPatch {
            color: Some("red".into()),
            ..ItemPatch::default()
        });
        pending.merge(ItemPatch::position(120.0, 100.0));

        assert_eq!(pending.x, Some(120.0));
        assert_eq!(pending.color.as_deref(), Some("red"));
    }

    #[test]
    fn split_position_separates_drag_from_edits() {
        let patch = ItemPatch {
            x: Some(1.0),
            content: Some("c".into()),
            ..ItemPatch::default()
        };
        let (pos, rest) = patch.split_position();
        assert_eq!(pos.unwrap().x, Some(1.0));
        let rest = rest.unwrap();
        assert!(rest.x.is_none());
        assert_eq!(rest.content.as_deref(), Some("c"));

        let (pos, rest) = ItemPatch::position(1.0, 2.0).split_position();
        assert!(pos.is_some());
        assert!(rest.is_none());
    }
}
