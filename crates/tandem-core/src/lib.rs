//! Real-time synchronization engine for Tandem shared canvases.
//!
//! This crate owns the authoritative in-memory state of every space and
//! the machinery that keeps connected clients in sync with it.
//!
//! # Modules
//!
//! - [`store`] -- [`SpaceStore`]: per-space item collections and timestamps.
//! - [`presence`] -- [`PresenceTracker`]: ephemeral cursor positions with
//!   join/leave detection.
//! - [`hub`] -- [`BroadcastHub`]: per-space subscriber registry with
//!   best-effort fan-out and dead-subscriber eviction.
//! - [`gateway`] -- [`Gateway`]: validates intents, applies them, and
//!   publishes the resulting events in mutation order.
//! - [`blocklist`] -- [`BlockCheck`] trait, [`BlockList`] and
//!   [`NeverBlocked`].
//! - [`mirror`] -- Non-blocking hand-off to the persistence mirror.
//! - [`config`] -- Configuration loading from `tandem-config.yaml`.
//!
//! [`SpaceStore`]: store::SpaceStore
//! [`PresenceTracker`]: presence::PresenceTracker
//! [`BroadcastHub`]: hub::BroadcastHub
//! [`Gateway`]: gateway::Gateway
//! [`BlockCheck`]: blocklist::BlockCheck
//! [`BlockList`]: blocklist::BlockList
//! [`NeverBlocked`]: blocklist::NeverBlocked

pub mod blocklist;
pub mod config;
pub mod gateway;
pub mod hub;
pub mod mirror;
pub mod presence;
pub mod store;
