//! Shared type definitions for the Tandem canvas synchronization engine.
//!
//! This crate is the single source of truth for every value that crosses
//! the wire between the server and canvas clients. Types flow downstream
//! to `TypeScript` via `ts-rs` so browser clients decode exactly what the
//! server encodes.
//!
//! # Modules
//!
//! - [`ids`] -- Server-minted UUID identifiers and validated string keys
//! - [`item`] -- Canvas items, their per-variant payloads, drafts and patches
//! - [`cursor`] -- Ephemeral cursor positions
//! - [`space`] -- Space records and client snapshots
//! - [`event`] -- The event stream's tagged unions
//! - [`validate`] -- Payload validation errors and helpers

pub mod cursor;
pub mod event;
pub mod ids;
pub mod item;
pub mod space;
pub mod validate;

// Re-export all public types at crate root for convenience.
pub use cursor::CursorPosition;
pub use event::{Handshake, HandshakeTag, ServerFrame, SseEvent};
pub use ids::{ClientId, IdError, ItemId, SpaceId, SpaceSlug, SubscriberId};
pub use item::{
    CanvasItem, ConnectorEnd, ConnectorType, ItemDraft, ItemKind, ItemPatch, ItemType, Point,
    ShapeType, TableCell,
};
pub use space::{Space, SpaceSnapshot};
pub use validate::InvalidPayload;
