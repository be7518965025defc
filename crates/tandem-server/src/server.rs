//! HTTP server lifecycle.
//!
//! Provides [`start_server`], which binds the configured address and
//! serves the router until the process is terminated.

use std::net::SocketAddr;
use std::sync::Arc;

use tandem_core::config::ServerSettings;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Start the Tandem HTTP server.
///
/// # Errors
///
/// Returns an error if the address is malformed, the TCP listener cannot
/// bind, or the server hits a fatal I/O error.
pub async fn start_server(config: &ServerSettings, state: Arc<AppState>) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    let router = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    info!(%addr, "Tandem server listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    Ok(())
}

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_host_fails_to_bind() {
        let config = ServerSettings {
            host: "not a host".to_owned(),
            ..ServerSettings::default()
        };
        let state = Arc::new(AppState::new(Arc::default()));
        let result = start_server(&config, state).await;
        assert!(matches!(result, Err(ServerError::Bind(_))));
    }
}
