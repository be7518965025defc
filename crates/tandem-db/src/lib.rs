//! `PostgreSQL` persistence for Tandem.
//!
//! The live engine in `tandem-core` is memory-resident and authoritative.
//! This crate only mirrors space and item lifecycle events into reporting
//! tables and supplies the moderation block list.
//!
//! ```text
//! Gateway --try_send--> mirror queue --> MirrorWriter --> spaces, canvas_items
//!
//! blocked_spaces --(every N secs)--> BlockList --> Gateway::ensure_writable
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool
//! - [`mirror_writer`] -- Drains mirror events into the reporting tables
//! - [`block_store`] -- Blocked-space loader and periodic refresh
//! - [`error`] -- Shared error types

pub mod block_store;
pub mod error;
pub mod mirror_writer;
pub mod postgres;

// Re-export primary types for convenience.
pub use block_store::{BlockedSpaceRow, BlockedSpaceStore, spawn_block_list_refresh};
pub use error::DbError;
pub use mirror_writer::MirrorWriter;
pub use postgres::PostgresPool;
