//! Mention events and enriched records
//!
//! A [`MentionEvent`] is decoded from one message on the input topic and lives
//! for a single enrichment pass. An [`EnrichedRecord`] is what gets persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Platform used when the event does not name one
pub const DEFAULT_PLATFORM: &str = "Unknown";

/// Author used when the event does not name one
pub const DEFAULT_AUTHOR: &str = "Anonymous";

/// Largest message body accepted for decoding
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Failure to turn a raw message body into a [`MentionEvent`]
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body exceeds [`MAX_PAYLOAD_BYTES`]
    #[error("payload of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },

    /// Body is not UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Body is not JSON, or a field has the wrong JSON type
    #[error("payload is not a valid mention: {0}")]
    Json(#[from] serde_json::Error),

    /// Body is valid JSON but not an object
    #[error("payload must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// Field parsed but violates its contract
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Wire shape as produced by the collector. Every field is optional; absent
/// and `null` are treated the same.
#[derive(Debug, Deserialize)]
struct WireMention {
    id: Option<String>,
    platform: Option<String>,
    content: Option<String>,
    author: Option<String>,
    author_followers: Option<i64>,
    impact_score: Option<f64>,
    media_meta: Option<BTreeMap<String, String>>,
}

/// One social-media mention with defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct MentionEvent {
    /// Collector-assigned origin id (e.g. `reddit_abc123`), if any
    pub source_id: Option<String>,
    pub platform: String,
    /// Text to analyze, possibly empty
    pub content: String,
    pub author: String,
    /// Never negative
    pub author_followers: i64,
    pub impact_score: f64,
    pub media_meta: BTreeMap<String, String>,
}

impl MentionEvent {
    /// Decode a raw message body
    ///
    /// Unknown fields are ignored. Missing fields take the documented defaults:
    /// `platform = "Unknown"`, `content = ""`, `author = "Anonymous"`,
    /// `author_followers = 0`, `impact_score = 0.0`, `media_meta = {}`.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(DecodeError::TooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_BYTES,
            });
        }

        let text = std::str::from_utf8(payload)?;
        let value: serde_json::Value = serde_json::from_str(text)?;

        if !value.is_object() {
            return Err(DecodeError::NotAnObject(json_kind(&value)));
        }

        let wire: WireMention = serde_json::from_value(value)?;

        let author_followers = wire.author_followers.unwrap_or(0);
        if author_followers < 0 {
            return Err(DecodeError::InvalidField {
                field: "author_followers",
                reason: format!("must be non-negative, got {}", author_followers),
            });
        }

        Ok(Self {
            source_id: wire.id,
            platform: wire.platform.unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            content: wire.content.unwrap_or_default(),
            author: wire.author.unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            author_followers,
            impact_score: wire.impact_score.unwrap_or(0.0),
            media_meta: wire.media_meta.unwrap_or_default(),
        })
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Entity categories kept on enriched records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityLabel {
    Person,
    Org,
    Location,
}

impl EntityLabel {
    /// Map an extractor label onto the kept categories
    ///
    /// Geopolitical entities (`GPE`) and plain locations (`LOC`) both become
    /// [`EntityLabel::Location`]. Every other category returns `None`.
    pub fn from_model_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "PERSON" | "PER" => Some(Self::Person),
            "ORG" => Some(Self::Org),
            "GPE" | "LOC" | "LOCATION" => Some(Self::Location),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Org => "ORG",
            Self::Location => "LOCATION",
        }
    }
}

/// Named span found in mention text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: EntityLabel,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: EntityLabel) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

/// Mention plus its analysis results, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub source_id: Option<String>,
    pub platform: String,
    pub content: String,
    pub author: String,
    pub author_followers: i64,
    pub impact_score: f64,
    pub media_meta: BTreeMap<String, String>,
    /// Always within [-1.0, 1.0]
    pub sentiment_score: f64,
    pub entities: Vec<Entity>,
    /// Capture time, set when enrichment completes
    pub timestamp: DateTime<Utc>,
}

impl EnrichedRecord {
    /// Build a record from a decoded event and its analysis results
    pub fn new(
        event: MentionEvent,
        sentiment_score: f64,
        entities: Vec<Entity>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: event.source_id,
            platform: event.platform,
            content: event.content,
            author: event.author,
            author_followers: event.author_followers,
            impact_score: event.impact_score,
            media_meta: event.media_meta,
            sentiment_score,
            entities,
            timestamp,
        }
    }

    /// Entities as stored in the `entities` column
    pub fn entities_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entities)
    }

    /// Media metadata as stored in the `media_meta` column
    pub fn media_meta_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.media_meta)
    }
}
