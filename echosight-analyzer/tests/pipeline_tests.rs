//! End-to-end pipeline tests
//!
//! Messages go through a channel source into a real SQLite store created by
//! `init_store`, the same path the binary takes.

use async_trait::async_trait;
use echosight_analyzer::dead_letter::DeadLetterSink;
use echosight_analyzer::enrichment::{LexiconSentiment, SentimentScorer};
use echosight_analyzer::error::{DeadLetterError, EnrichmentError, PersistError, SourceError};
use echosight_analyzer::source::{channel_source, ChannelSender, LineSource, SourceMessage};
use echosight_analyzer::{
    BackoffPolicy, ConsumerExit, ConsumerState, ConsumerSupervisor, EntityCapability, Enricher,
    FailureKind, IngestionConsumer, MentionWriter, PipelineError, RecordSink,
};
use echosight_common::config::EntityModelSource;
use echosight_common::db::init_store;
use echosight_common::mention::MAX_PAYLOAD_BYTES;
use echosight_common::EnrichedRecord;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct TestStore {
    pool: SqlitePool,
    _dir: TempDir,
}

async fn setup_store() -> TestStore {
    let dir = TempDir::new().unwrap();
    let (pool, _) = init_store(&dir.path().join("echosight.db"), 2).await.unwrap();
    TestStore { pool, _dir: dir }
}

fn builtin_enricher() -> Arc<Enricher> {
    Arc::new(Enricher::from_config(&EntityModelSource::Builtin))
}

fn channel_consumer(store: &TestStore, enricher: Arc<Enricher>) -> (ChannelSender, IngestionConsumer) {
    let (sender, source) = channel_source(32);
    let writer = Arc::new(MentionWriter::new(store.pool.clone()));
    (sender, IngestionConsumer::new(Box::new(source), enricher, writer))
}

/// Send payloads, close the channel, and run the consumer to exhaustion
async fn run_payloads(consumer: &mut IngestionConsumer, sender: ChannelSender, payloads: &[&str]) {
    for (offset, payload) in payloads.iter().enumerate() {
        sender
            .send(Ok(SourceMessage::new(offset as i64, payload.as_bytes())))
            .await
            .unwrap();
    }
    drop(sender);

    let exit = consumer.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(exit, ConsumerExit::SourceExhausted);
}

async fn all_rows(pool: &SqlitePool) -> Vec<sqlx::sqlite::SqliteRow> {
    sqlx::query("SELECT * FROM sentiment_history ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

fn entities_of(row: &sqlx::sqlite::SqliteRow) -> Vec<Value> {
    let raw: String = row.get("entities");
    serde_json::from_str::<Vec<Value>>(&raw).unwrap()
}

#[tokio::test]
async fn test_positive_mention_persisted_with_defaults() {
    let store = setup_store().await;
    let (sender, mut consumer) = channel_consumer(&store, builtin_enricher());

    run_payloads(
        &mut consumer,
        sender,
        &[r#"{"platform":"Twitter","content":"I love this product!","author":"alice"}"#],
    )
    .await;

    let rows = all_rows(&store.pool).await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get::<String, _>("platform"), "Twitter");
    assert_eq!(row.get::<String, _>("author"), "alice");
    assert!(row.get::<f64, _>("sentiment_score") > 0.0);
    assert_eq!(row.get::<i64, _>("author_followers"), 0);
    assert_eq!(row.get::<f64, _>("impact_score"), 0.0);
    assert!(entities_of(row).is_empty());
}

#[tokio::test]
async fn test_entities_are_extracted_and_filtered() {
    let store = setup_store().await;
    let (sender, mut consumer) = channel_consumer(&store, builtin_enricher());

    run_payloads(
        &mut consumer,
        sender,
        &[r#"{"content":"Apple announced a new office in Paris on Friday."}"#],
    )
    .await;

    let rows = all_rows(&store.pool).await;
    let entities = entities_of(&rows[0]);
    assert_eq!(
        entities,
        vec![
            serde_json::json!({"text": "Apple", "label": "ORG"}),
            serde_json::json!({"text": "Paris", "label": "LOCATION"}),
        ]
    );
    assert_eq!(rows[0].get::<String, _>("platform"), "Unknown");
    assert_eq!(rows[0].get::<String, _>("author"), "Anonymous");
}

#[tokio::test]
async fn test_empty_content_scores_zero() {
    let store = setup_store().await;
    let (sender, mut consumer) = channel_consumer(&store, builtin_enricher());

    run_payloads(&mut consumer, sender, &[r#"{"content":""}"#, r#"{"platform":"Reddit"}"#]).await;

    let rows = all_rows(&store.pool).await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.get::<f64, _>("sentiment_score"), 0.0);
        assert!(entities_of(row).is_empty());
        assert_eq!(row.get::<String, _>("content"), "");
    }
}

#[tokio::test]
async fn test_redelivery_is_not_deduplicated() {
    let store = setup_store().await;
    let (sender, mut consumer) = channel_consumer(&store, builtin_enricher());
    let payload = r#"{"id":"tw_1","platform":"Twitter","content":"Great launch","author":"bob"}"#;

    run_payloads(&mut consumer, sender, &[payload, payload]).await;

    let rows = all_rows(&store.pool).await;
    assert_eq!(rows.len(), 2);
    assert_ne!(rows[0].get::<i64, _>("id"), rows[1].get::<i64, _>("id"));
    assert_eq!(rows[0].get::<Option<String>, _>("source_id").as_deref(), Some("tw_1"));
    assert_eq!(rows[1].get::<Option<String>, _>("source_id").as_deref(), Some("tw_1"));
}

#[tokio::test]
async fn test_malformed_message_does_not_stop_consumption() {
    let store = setup_store().await;
    let (sender, mut consumer) = channel_consumer(&store, builtin_enricher());
    let stats = consumer.stats();

    run_payloads(
        &mut consumer,
        sender,
        &[
            "{not json",
            r#"["an", "array"]"#,
            r#"{"author_followers": -1}"#,
            r#"{"content":"still here","author_followers":10,"impact_score":2.5}"#,
        ],
    )
    .await;

    let rows = all_rows(&store.pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("content"), "still here");
    assert_eq!(rows[0].get::<i64, _>("author_followers"), 10);

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.received, 4);
    assert_eq!(snapshot.persisted, 1);
    assert_eq!(snapshot.skipped_decode, 3);
    assert_eq!(snapshot.skipped, 3);
}

#[tokio::test]
async fn test_media_meta_round_trips_as_json() {
    let store = setup_store().await;
    let (sender, mut consumer) = channel_consumer(&store, builtin_enricher());

    run_payloads(
        &mut consumer,
        sender,
        &[r#"{"content":"pic","media_meta":{"thumbnail":"https://x/y.png","type":"image"}}"#],
    )
    .await;

    let rows = all_rows(&store.pool).await;
    let meta: Value = serde_json::from_str(&rows[0].get::<String, _>("media_meta")).unwrap();
    assert_eq!(meta["thumbnail"], "https://x/y.png");
    assert_eq!(meta["type"], "image");
}

#[tokio::test]
async fn test_unavailable_entity_capability_still_persists() {
    let store = setup_store().await;
    let enricher = Arc::new(Enricher::new(
        Arc::new(LexiconSentiment::new()),
        EntityCapability::unavailable("model not installed"),
    ));
    let (sender, mut consumer) = channel_consumer(&store, enricher);

    run_payloads(&mut consumer, sender, &[r#"{"content":"Apple in Paris is great"}"#]).await;

    let rows = all_rows(&store.pool).await;
    assert_eq!(rows.len(), 1);
    assert!(entities_of(&rows[0]).is_empty());
    assert!(rows[0].get::<f64, _>("sentiment_score") > 0.0);
}

/// Fails every Nth write, delegating the rest
struct FlakySink {
    inner: MentionWriter,
    fail_on: usize,
    calls: Mutex<usize>,
}

#[async_trait]
impl RecordSink for FlakySink {
    async fn persist(&self, record: &EnrichedRecord) -> Result<i64, PersistError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if call == self.fail_on {
            return Err(PersistError::Store(sqlx::Error::PoolTimedOut));
        }
        self.inner.persist(record).await
    }
}

/// Records what was dead-lettered
#[derive(Default)]
struct RecordingDeadLetters {
    routed: Mutex<Vec<(i64, FailureKind, String)>>,
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn route(&self, message: &SourceMessage, error: &PipelineError) -> Result<(), DeadLetterError> {
        self.routed
            .lock()
            .unwrap()
            .push((message.offset, error.kind(), error.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn test_persist_failure_is_isolated_and_dead_lettered() {
    let store = setup_store().await;
    let (sender, source) = channel_source(8);
    let sink = Arc::new(FlakySink {
        inner: MentionWriter::new(store.pool.clone()),
        fail_on: 2,
        calls: Mutex::new(0),
    });
    let dead_letters = Arc::new(RecordingDeadLetters::default());
    let mut consumer = IngestionConsumer::new(Box::new(source), builtin_enricher(), sink)
        .with_dead_letters(dead_letters.clone());
    let stats = consumer.stats();

    run_payloads(
        &mut consumer,
        sender,
        &[
            r#"{"content":"one"}"#,
            r#"{"content":"two"}"#,
            "garbage",
            r#"{"content":"three"}"#,
        ],
    )
    .await;

    let contents: Vec<String> = all_rows(&store.pool)
        .await
        .iter()
        .map(|r| r.get("content"))
        .collect();
    assert_eq!(contents, vec!["one", "three"]);

    let routed = dead_letters.routed.lock().unwrap().clone();
    assert_eq!(routed.len(), 2);
    assert_eq!(routed[0].0, 1);
    assert_eq!(routed[0].1, FailureKind::Persistence);
    assert_eq!(routed[1].0, 2);
    assert_eq!(routed[1].1, FailureKind::Decode);

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.skipped_persistence, 1);
    assert_eq!(snapshot.skipped_decode, 1);
    assert_eq!(snapshot.persisted, 2);
}

/// Lexicon scores, except NaN for any text mentioning "unscorable"
struct NanOnKeyword(LexiconSentiment);

impl SentimentScorer for NanOnKeyword {
    fn name(&self) -> &'static str {
        "nan-on-keyword"
    }

    fn polarity(&self, text: &str) -> Result<f64, EnrichmentError> {
        if text.contains("unscorable") {
            return Ok(f64::NAN);
        }
        self.0.polarity(text)
    }
}

#[tokio::test]
async fn test_enrichment_failure_is_isolated_and_dead_lettered() {
    let store = setup_store().await;
    let enricher = Arc::new(Enricher::new(
        Arc::new(NanOnKeyword(LexiconSentiment::new())),
        EntityCapability::unavailable("off"),
    ));
    let (sender, source) = channel_source(8);
    let dead_letters = Arc::new(RecordingDeadLetters::default());
    let mut consumer = IngestionConsumer::new(
        Box::new(source),
        enricher,
        Arc::new(MentionWriter::new(store.pool.clone())),
    )
    .with_dead_letters(dead_letters.clone());
    let stats = consumer.stats();

    run_payloads(
        &mut consumer,
        sender,
        &[r#"{"content":"this one is unscorable"}"#, r#"{"content":"a good one"}"#],
    )
    .await;

    let rows = all_rows(&store.pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("content"), "a good one");

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.received, 2);
    assert_eq!(snapshot.persisted, 1);
    assert_eq!(snapshot.skipped_enrichment, 1);
    assert_eq!(snapshot.skipped, 1);
    assert!(snapshot.last_error.unwrap().starts_with("enrichment failed"));

    let routed = dead_letters.routed.lock().unwrap().clone();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].0, 0);
    assert_eq!(routed[0].1, FailureKind::Enrichment);
}

#[tokio::test]
async fn test_oversized_line_is_skipped_as_decode_failure() {
    let store = setup_store().await;
    let mut input = br#"{"content":""#.to_vec();
    input.resize(MAX_PAYLOAD_BYTES + 100, b'a');
    input.extend_from_slice(b"\"}\n{\"content\":\"small\"}\n");

    let source = LineSource::new(std::io::Cursor::new(input), "test");
    let mut consumer = IngestionConsumer::new(
        Box::new(source),
        builtin_enricher(),
        Arc::new(MentionWriter::new(store.pool.clone())),
    );
    let stats = consumer.stats();

    let exit = consumer.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(exit, ConsumerExit::SourceExhausted);

    let rows = all_rows(&store.pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("content"), "small");

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.skipped_decode, 1);
    assert!(snapshot.last_error.unwrap().contains("exceeds"));
}

#[tokio::test]
async fn test_supervisor_restarts_after_source_error() {
    let store = setup_store().await;
    let (sender, consumer) = channel_consumer(&store, builtin_enricher());
    let policy = BackoffPolicy {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(50),
        max_restarts: Some(3),
    };
    let supervisor = ConsumerSupervisor::new(consumer, policy, CancellationToken::new());
    let status = supervisor.status();
    let handle = supervisor.spawn();

    sender.send(Ok(SourceMessage::new(0, r#"{"content":"before"}"#))).await.unwrap();
    sender
        .send(Err(SourceError::Transport("broker connection lost".to_string())))
        .await
        .unwrap();
    sender.send(Ok(SourceMessage::new(1, r#"{"content":"after"}"#))).await.unwrap();
    drop(sender);

    let final_state = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(final_state, ConsumerState::Stopped);
    assert_eq!(status.restarts(), 1);
    assert_eq!(all_rows(&store.pool).await.len(), 2);
}

#[tokio::test]
async fn test_supervisor_gives_up_after_max_restarts() {
    let store = setup_store().await;
    let (sender, consumer) = channel_consumer(&store, builtin_enricher());
    let stats = consumer.stats();
    let policy = BackoffPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(5),
        max_restarts: Some(2),
    };
    let supervisor = ConsumerSupervisor::new(consumer, policy, CancellationToken::new());
    let status = supervisor.status();

    for _ in 0..3 {
        sender
            .send(Err(SourceError::Transport("down".to_string())))
            .await
            .unwrap();
    }

    let final_state = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
        .await
        .unwrap();

    assert_eq!(final_state, ConsumerState::Failed);
    assert_eq!(status.state().await, ConsumerState::Failed);
    assert_eq!(status.restarts(), 2);
    let last_error = stats.snapshot().await.last_error.unwrap();
    assert!(last_error.starts_with("source error"));
    drop(sender);
}

#[tokio::test]
async fn test_cancellation_stops_idle_consumer() {
    let store = setup_store().await;
    let (sender, consumer) = channel_consumer(&store, builtin_enricher());
    let cancel = CancellationToken::new();
    let policy = BackoffPolicy {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(10),
        max_restarts: None,
    };
    let supervisor = ConsumerSupervisor::new(consumer, policy, cancel.clone());
    let handle = supervisor.spawn();

    // Source stays open with nothing to read
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let final_state = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(final_state, ConsumerState::Stopped);
    drop(sender);
}

#[tokio::test]
async fn test_unreachable_store_is_fatal() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let result = init_store(&blocker.join("echosight.db"), 1).await;
    assert!(result.is_err());
}
