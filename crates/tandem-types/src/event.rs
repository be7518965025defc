//! The event stream's wire messages.
//!
//! Every frame on a subscription stream is either the one-time
//! [`Handshake`] or an [`SseEvent`]. Both are tagged by `type`, so a
//! client decodes any frame as a [`ServerFrame`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cursor::CursorPosition;
use crate::ids::{ItemId, SubscriberId};
use crate::item::CanvasItem;

/// A mutation or presence change broadcast to the subscribers of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type")]
#[ts(export, export_to = "bindings/")]
pub enum SseEvent {
    /// An item was added to the space.
    #[serde(rename = "item:created")]
    ItemCreated {
        /// The stored item, with server-assigned fields.
        item: CanvasItem,
    },
    /// An item was changed; carries the whole merged item.
    #[serde(rename = "item:updated")]
    ItemUpdated {
        /// The item after the merge.
        item: CanvasItem,
    },
    /// An item was removed.
    #[serde(rename = "item:deleted")]
    ItemDeleted {
        /// Id of the removed item.
        #[serde(rename = "itemId")]
        item_id: ItemId,
    },
    /// Every item in the space was cleared.
    #[serde(rename = "space:reset")]
    SpaceReset,
    /// A client's first cursor position in this space.
    #[serde(rename = "cursor:join")]
    CursorJoin {
        /// The new cursor.
        cursor: CursorPosition,
    },
    /// A known cursor moved.
    #[serde(rename = "cursor:move")]
    CursorMove {
        /// The cursor's new position.
        cursor: CursorPosition,
    },
    /// A cursor left; carries its last known position.
    #[serde(rename = "cursor:leave")]
    CursorLeave {
        /// The cursor as last seen.
        cursor: CursorPosition,
    },
}

impl SseEvent {
    /// The `type` tag as it appears on the wire.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ItemCreated { .. } => "item:created",
            Self::ItemUpdated { .. } => "item:updated",
            Self::ItemDeleted { .. } => "item:deleted",
            Self::SpaceReset => "space:reset",
            Self::CursorJoin { .. } => "cursor:join",
            Self::CursorMove { .. } => "cursor:move",
            Self::CursorLeave { .. } => "cursor:leave",
        }
    }

    /// The item this event concerns, for item events.
    pub const fn item_id(&self) -> Option<&ItemId> {
        match self {
            Self::ItemCreated { item } | Self::ItemUpdated { item } => Some(&item.id),
            Self::ItemDeleted { item_id } => Some(item_id),
            Self::SpaceReset
            | Self::CursorJoin { .. }
            | Self::CursorMove { .. }
            | Self::CursorLeave { .. } => None,
        }
    }

    /// Whether this is a presence (cursor) event.
    pub const fn is_cursor(&self) -> bool {
        matches!(
            self,
            Self::CursorJoin { .. } | Self::CursorMove { .. } | Self::CursorLeave { .. }
        )
    }
}

/// Tag value of the handshake frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum HandshakeTag {
    /// The only value: `"connected"`.
    #[default]
    #[serde(rename = "connected")]
    Connected,
}

/// First frame on every stream: tells the client its subscriber id so it
/// can tag its own intents as the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Handshake {
    /// Always `"connected"`.
    #[serde(rename = "type")]
    pub tag: HandshakeTag,
    /// The stream's subscriber id.
    #[serde(rename = "clientId")]
    pub client_id: SubscriberId,
}

impl Handshake {
    /// Handshake for the given subscriber.
    pub const fn new(client_id: SubscriberId) -> Self {
        Self {
            tag: HandshakeTag::Connected,
            client_id,
        }
    }
}

/// Any frame a subscription stream can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum ServerFrame {
    /// The opening handshake.
    Connected(Handshake),
    /// A broadcast event.
    Event(SseEvent),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::item::{ItemDraft, ItemKind};

    #[test]
    fn event_tags_match_wire_names() {
        let item = ItemDraft::new(ItemKind::Sticky, 100.0, 100.0)
            .into_item("s1".parse().unwrap(), Utc::now());
        let created = SseEvent::ItemCreated { item };
        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["type"], "item:created");
        assert_eq!(json["item"]["id"], "s1");
        assert_eq!(json["item"]["type"], "sticky");
        assert_eq!(created.name(), "item:created");
    }

    #[test]
    fn reset_and_delete_payloads() {
        let reset = serde_json::to_string(&SseEvent::SpaceReset).unwrap();
        assert_eq!(reset, r#"{"type":"space:reset"}"#);

        let deleted = SseEvent::ItemDeleted {
            item_id: "s1".parse().unwrap(),
        };
        let json = serde_json::to_string(&deleted).unwrap();
        assert_eq!(json, r#"{"type":"item:deleted","itemId":"s1"}"#);
    }

    #[test]
    fn handshake_shape() {
        let id = SubscriberId::new();
        let json = serde_json::to_value(Handshake::new(id)).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["clientId"], id.to_string());
    }

    #[test]
    fn server_frame_decodes_both_kinds() {
        let id = SubscriberId::new();
        let raw = format!(r#"{{"type":"connected","clientId":"{id}"}}"#);
        let frame: ServerFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame, ServerFrame::Connected(Handshake::new(id)));

        let frame: ServerFrame = serde_json::from_str(r#"{"type":"space:reset"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Event(SseEvent::SpaceReset));
    }
}
