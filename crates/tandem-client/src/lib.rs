//! Client side of the Tandem synchronization protocol.
//!
//! The server treats every intent independently and echoes item events to
//! every stream. Keeping a canvas smooth on top of that takes a few rules
//! the client must follow; this crate packages them as deterministic,
//! transport-free building blocks:
//!
//! - [`reconcile`] -- Optimistic local state, echo and stale-event
//!   suppression, delete guard and rollback
//! - [`coalesce`] -- Trailing-edge coalescing of positional writes
//! - [`decode`] -- Incremental `text/event-stream` decoder
//!
//! Every time-dependent call takes the current [`Instant`](std::time::Instant)
//! as an argument, so behavior is reproducible in tests.

pub mod coalesce;
pub mod decode;
pub mod reconcile;

// Re-export primary types for convenience.
pub use coalesce::WriteCoalescer;
pub use decode::{DecodeError, SseDecoder};
pub use reconcile::{ReconcileConfig, ReconcileError, Reconciler, RemoteOutcome};
