//! RPC handlers.

use super::RpcState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use std::sync::atomic::Ordering;

/// Liveness probe.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe.
pub async fn ready(State(state): State<RpcState>) -> StatusCode {
    if state.ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Node status: consensus state tag, view, head and peers.
pub async fn status(State(state): State<RpcState>) -> Json<serde_json::Value> {
    let view = state.consensus.view();
    let head = state.status.get();
    Json(json!({
        "state": state.consensus.state().to_string(),
        "view": { "sequence": view.sequence, "round": view.round },
        "head": {
            "number": head.number,
            "hash": head.hash.to_hex(),
        },
        "peers": state.peers.len(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Sync status: local tip and best-known network height.
pub async fn sync(State(state): State<RpcState>) -> Json<serde_json::Value> {
    let head = state.status.get();
    let best = state.peers.best_number();
    Json(json!({
        "number": head.number,
        "hash": head.hash.to_hex(),
        "difficulty": head.difficulty.to_string(),
        "network_best": best,
        "syncing": best.is_some_and(|b| b > head.number),
    }))
}
