//! echosight-analyzer library
//!
//! Consumes social-media mentions, scores their sentiment, tags named
//! entities, and persists enriched records. Exposes a liveness endpoint.

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod consumer;
pub mod dead_letter;
pub mod enrichment;
pub mod error;
pub mod persistence;
pub mod source;
pub mod supervisor;

pub use consumer::{ConsumerExit, ConsumerStats, IngestionConsumer};
pub use enrichment::{EntityCapability, Enricher};
pub use error::{FailureKind, PipelineError};
pub use persistence::{MentionWriter, RecordSink};
pub use supervisor::{BackoffPolicy, ConsumerState, ConsumerSupervisor, SupervisorStatus};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub stats: Arc<ConsumerStats>,
    pub supervisor: Arc<SupervisorStatus>,
    /// Entity capability status, fixed at startup
    pub entity_extraction: &'static str,
    pub startup_time: Instant,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        stats: Arc<ConsumerStats>,
        supervisor: Arc<SupervisorStatus>,
        entity_capability: &EntityCapability,
    ) -> Self {
        Self {
            db,
            stats,
            supervisor,
            entity_extraction: entity_capability.status(),
            startup_time: Instant::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
