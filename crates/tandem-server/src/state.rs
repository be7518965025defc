//! Shared application state for the Tandem HTTP server.

use std::sync::Arc;
use std::time::Duration;

use tandem_core::gateway::Gateway;

/// Default interval between SSE keep-alive comments.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The synchronization gateway all intents go through.
    pub gateway: Arc<Gateway>,
    /// Interval between keep-alive comments on idle event streams.
    pub keep_alive: Duration,
}

impl AppState {
    /// Wrap a gateway with default stream settings.
    pub const fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Set the keep-alive interval for event streams.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}
