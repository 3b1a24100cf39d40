use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::proxy::server::AppState;

/// Liveness plus backend status; unauthenticated
pub async fn handle_root(State(state): State<AppState>) -> Json<Value> {
    let running = tokio::time::timeout(state.sessions.timeout(), state.backend.is_running())
        .await
        .unwrap_or(false);

    Json(json!({
        "data": {
            "status": "ok",
            "backendRunning": running
        }
    }))
}
