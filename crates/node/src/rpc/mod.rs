//! Status RPC.
//!
//! A small axum API for operators and monitoring:
//!
//! - `GET /health` — liveness probe
//! - `GET /ready` — readiness probe (true once tasks are wired)
//! - `GET /api/v1/status` — consensus state tag, view, head, peer count
//! - `GET /api/v1/sync` — local sync status
//!
//! The consensus state tag and view are read through the driver's atomic
//! accessor; no handler ever takes the driver's lock.

mod handlers;

use axum::routing::get;
use axum::Router;
use istria_chain::StatusTracker;
use istria_ibft::SharedState;
use istria_sync::PeerBook;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state for RPC handlers.
#[derive(Clone)]
pub struct RpcState {
    /// Readiness flag, set once the node's tasks are running.
    pub ready: Arc<AtomicBool>,
    /// Consensus state tag and view (atomic accessors).
    pub consensus: Arc<SharedState>,
    /// Local chain tip.
    pub status: Arc<StatusTracker>,
    /// Peer status book.
    pub peers: Arc<PeerBook>,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

/// Build the router.
pub fn create_router(state: RpcState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .nest(
            "/api/v1",
            Router::new()
                .route("/status", get(handlers::status))
                .route("/sync", get(handlers::sync)),
        )
        .with_state(state)
}

/// Serve the RPC until cancelled.
pub async fn serve(
    listen: &str,
    state: RpcState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(address = %listen, "Status RPC listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
