//! Liveness endpoint
//!
//! Always answers 200 while the process is up. `status` turns "degraded" when
//! the store is unreachable or the consumer has given up, so operators can
//! tell a live process from a working pipeline.

use axum::{extract::State, routing::get, Json, Router};
use echosight_common::db::ping;
use serde::Serialize;
use tracing::warn;

use crate::consumer::StatsSnapshot;
use crate::supervisor::ConsumerState;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// "ok" or "unreachable"
    pub database: String,
    /// "available" or "unavailable"
    pub entity_extraction: String,
    pub consumer: ConsumerHealth,
}

#[derive(Debug, Serialize)]
pub struct ConsumerHealth {
    pub state: ConsumerState,
    pub restarts: u32,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database_ok = match ping(&state.db).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: store unreachable: {}", e);
            false
        }
    };

    let consumer_state = state.supervisor.state().await;
    let degraded = !database_ok || consumer_state == ConsumerState::Failed;

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        module: "echosight-analyzer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.startup_time.elapsed().as_secs(),
        database: if database_ok { "ok" } else { "unreachable" }.to_string(),
        entity_extraction: state.entity_extraction.to_string(),
        consumer: ConsumerHealth {
            state: consumer_state,
            restarts: state.supervisor.restarts(),
            stats: state.stats.snapshot().await,
        },
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
