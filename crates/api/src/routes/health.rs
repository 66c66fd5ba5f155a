//! Liveness and readiness checks

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// True when the store answers a ping within the store timeout
async fn store_reachable(state: &AppState) -> bool {
    let ping = state.store.health.ping();
    matches!(
        tokio::time::timeout(state.timeouts.store, ping).await,
        Ok(Ok(()))
    )
}

fn availability_status(up: bool) -> StatusCode {
    if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let up = store_reachable(&state).await;
    let label = if up { "healthy" } else { "unhealthy" };

    (
        availability_status(up),
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
            database: label,
        }),
    )
}

/// Process is up
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Ready once the store answers
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    availability_status(store_reachable(&state).await)
}
