//! HTTP listener
//!
//! Serves the router until the cancellation token fires. Every live session
//! is torn down before the listener stops, so joined viewers receive the
//! shutdown diagnostic and a normal close.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::routes::router;
use crate::state::GatewayState;

/// HTTP and WebSocket server
pub struct HttpServer {
    /// Shared gateway state
    state: Arc<GatewayState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server; `cancel` is normally `state.shutdown`
    pub fn new(state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Bind `bind_addr` and serve
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("HTTP server listening on {}", local_addr);

        let cancel = self.cancel.clone();
        let lifecycle = Arc::clone(&self.state.lifecycle);
        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down");
            lifecycle.shutdown_all().await;
        };

        axum::serve(listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        Ok(())
    }
}
