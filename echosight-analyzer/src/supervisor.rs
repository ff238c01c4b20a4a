//! Consumer supervision
//!
//! Runs the [`IngestionConsumer`] as a cancellable background task and
//! restarts it with exponential backoff after source errors. The backoff
//! resets once a run persists at least one message.

use crate::consumer::{ConsumerExit, IngestionConsumer};
use echosight_common::config::SupervisorConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle of the consumer task as seen by the liveness endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Starting,
    Running,
    Restarting,
    /// Cancelled or source exhausted
    Stopped,
    /// Gave up after too many consecutive failures
    Failed,
}

/// Shared state/restart counter
#[derive(Debug)]
pub struct SupervisorStatus {
    state: RwLock<ConsumerState>,
    restarts: AtomicU32,
}

impl SupervisorStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConsumerState::Starting),
            restarts: AtomicU32::new(0),
        }
    }

    pub async fn state(&self) -> ConsumerState {
        *self.state.read().await
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    async fn set(&self, state: ConsumerState) {
        *self.state.write().await = state;
    }
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential restart delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failed runs tolerated; `None` means unlimited
    pub max_restarts: Option<u32>,
}

impl BackoffPolicy {
    /// Delay before restart number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl From<&SupervisorConfig> for BackoffPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            max_restarts: config.max_restarts,
        }
    }
}

pub struct ConsumerSupervisor {
    consumer: IngestionConsumer,
    policy: BackoffPolicy,
    status: Arc<SupervisorStatus>,
    cancel: CancellationToken,
}

impl ConsumerSupervisor {
    pub fn new(consumer: IngestionConsumer, policy: BackoffPolicy, cancel: CancellationToken) -> Self {
        Self {
            consumer,
            policy,
            status: Arc::new(SupervisorStatus::new()),
            cancel,
        }
    }

    pub fn status(&self) -> Arc<SupervisorStatus> {
        Arc::clone(&self.status)
    }

    /// Run on the tokio runtime; the handle yields the final state
    pub fn spawn(self) -> JoinHandle<ConsumerState> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> ConsumerState {
        let stats = self.consumer.stats();
        let mut failures: u32 = 0;

        loop {
            self.status.set(ConsumerState::Running).await;
            let persisted_before = stats.persisted();

            let err = match self.consumer.run(&self.cancel).await {
                Ok(exit) => {
                    match exit {
                        ConsumerExit::Cancelled => info!("Consumer cancelled"),
                        ConsumerExit::SourceExhausted => info!("Consumer finished: source exhausted"),
                    }
                    self.status.set(ConsumerState::Stopped).await;
                    return ConsumerState::Stopped;
                }
                Err(e) => e,
            };

            stats.record_error(format!("source error: {}", err)).await;
            if stats.persisted() > persisted_before {
                failures = 0;
            }
            failures += 1;

            if let Some(max) = self.policy.max_restarts {
                if failures > max {
                    error!("Consumer failed {} times in a row, giving up: {}", failures, err);
                    self.status.set(ConsumerState::Failed).await;
                    return ConsumerState::Failed;
                }
            }

            let delay = self.policy.delay_for(failures);
            warn!(
                error = %err,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Consumer stopped on source error, restarting"
            );
            self.status.set(ConsumerState::Restarting).await;
            self.status.restarts.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Consumer cancelled during restart backoff");
                    self.status.set(ConsumerState::Stopped).await;
                    return ConsumerState::Stopped;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
