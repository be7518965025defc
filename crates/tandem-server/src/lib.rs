//! HTTP ingress for the Tandem canvas synchronization engine.
//!
//! This crate exposes the [`Gateway`](tandem_core::gateway::Gateway) over
//! an Axum server:
//!
//! - **REST intents** for spaces, items and cursors
//! - **Server-sent events** (`/api/spaces/{slug}/events`) streaming every
//!   change in a space, starting with a `connected` handshake
//! - **Health** (`/api/health`) reporting store and hub counters
//!
//! Handlers hold no state of their own. Ordering, validation, moderation
//! and fan-out all live in `tandem-core`; this layer only translates HTTP
//! to intents and [`GatewayError`](tandem_core::gateway::GatewayError) to
//! status codes.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod sse;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::AppState;
