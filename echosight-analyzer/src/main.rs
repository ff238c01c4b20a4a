//! echosight-analyzer - mention enrichment service
//!
//! Startup order: configuration, logging, store (schema reconciled before any
//! message is read), enrichment models, consumer task, liveness endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use echosight_analyzer::dead_letter::{DeadLetterSink, DiscardDeadLetters};
use echosight_analyzer::source::{LineSource, MessageSource};
use echosight_analyzer::{
    build_router, AppState, BackoffPolicy, ConsumerSupervisor, Enricher, IngestionConsumer,
    MentionWriter,
};
use echosight_common::config::{AnalyzerConfig, SourceKind};
use echosight_common::db::init_store;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for echosight-analyzer
#[derive(Parser, Debug)]
#[command(name = "echosight-analyzer")]
#[command(about = "Sentiment and entity enrichment for social-media mentions")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ECHOSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite store path
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Liveness endpoint port
    #[arg(short, long)]
    port: Option<u16>,

    /// Message source: kafka or stdin
    #[arg(long)]
    source: Option<SourceKind>,

    /// Kafka bootstrap brokers
    #[arg(long)]
    broker: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},sqlx=warn", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting echosight-analyzer v{}", env!("CARGO_PKG_VERSION"));
    info!("Store: {}", config.database_path.display());

    // Store problems are fatal: nothing is consumed against an unverified schema
    let (pool, reports) = init_store(&config.database_path, config.database_max_connections)
        .await
        .context("Failed to initialize store")?;
    for report in &reports {
        if !report.is_noop() {
            info!(
                "Reconciled {}: added {:?}, {} drift warning(s)",
                report.table,
                report.added_columns,
                report.drift_warnings.len()
            );
        }
    }

    let enricher = Arc::new(Enricher::from_config(&config.enrichment.entity_model));
    let source = build_source(&config)?;
    let dead_letters = build_dead_letters(&config)?;

    let writer = Arc::new(MentionWriter::new(pool.clone()));
    let consumer =
        IngestionConsumer::new(source, Arc::clone(&enricher), writer).with_dead_letters(dead_letters);
    info!("Message source: {}", consumer.source_description());
    let stats = consumer.stats();

    let cancel = CancellationToken::new();
    let policy = BackoffPolicy::from(&config.supervisor);
    let supervisor = ConsumerSupervisor::new(consumer, policy, cancel.clone());
    let state = AppState::new(pool.clone(), stats, supervisor.status(), enricher.entity_capability());
    let consumer_task = supervisor.spawn();

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Liveness endpoint on http://{}/health", addr);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
        .context("Server error")?;

    cancel.cancel();
    match consumer_task.await {
        Ok(final_state) => info!("Consumer task ended in state {:?}", final_state),
        Err(e) => warn!("Consumer task did not shut down cleanly: {}", e),
    }
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// CLI > environment > TOML file > defaults
fn resolve_config(args: &Args) -> Result<AnalyzerConfig> {
    let mut config = AnalyzerConfig::load(args.config.as_deref())?;
    config.apply_process_env()?;

    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(broker) = &args.broker {
        config.kafka.broker = broker.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_source(config: &AnalyzerConfig) -> Result<Box<dyn MessageSource>> {
    match config.source {
        SourceKind::Stdin => Ok(Box::new(LineSource::stdin())),
        SourceKind::Kafka => kafka_source(config),
    }
}

#[cfg(feature = "kafka")]
fn kafka_source(config: &AnalyzerConfig) -> Result<Box<dyn MessageSource>> {
    let source = echosight_analyzer::source::KafkaSource::connect(&config.kafka)
        .context("Failed to create Kafka consumer")?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "kafka"))]
fn kafka_source(_config: &AnalyzerConfig) -> Result<Box<dyn MessageSource>> {
    anyhow::bail!("source 'kafka' needs a build with `--features kafka`; use `--source stdin` otherwise")
}

#[cfg(feature = "kafka")]
fn build_dead_letters(config: &AnalyzerConfig) -> Result<Arc<dyn DeadLetterSink>> {
    match &config.kafka.dead_letter_topic {
        Some(topic) => {
            let sink = echosight_analyzer::dead_letter::KafkaDeadLetters::connect(&config.kafka.broker, topic)
                .context("Failed to create dead-letter producer")?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(DiscardDeadLetters)),
    }
}

#[cfg(not(feature = "kafka"))]
fn build_dead_letters(config: &AnalyzerConfig) -> Result<Arc<dyn DeadLetterSink>> {
    if let Some(topic) = &config.kafka.dead_letter_topic {
        warn!("Dead-letter topic '{}' ignored: built without the kafka feature", topic);
    }
    Ok(Arc::new(DiscardDeadLetters))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
