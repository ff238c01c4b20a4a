//! Mention enrichment
//!
//! Sentiment is mandatory; entity extraction is an optional capability that
//! is resolved once at startup and reported on the liveness endpoint.

pub mod entities;
pub mod sentiment;

pub use entities::GazetteerExtractor;
pub use sentiment::LexiconSentiment;

use crate::error::{EnrichmentError, EntityError};
use echosight_common::config::EntityModelSource;
use echosight_common::{Entity, EntityLabel};
use std::sync::Arc;
use tracing::{info, warn};

/// Polarity model
pub trait SentimentScorer: Send + Sync {
    /// Model name for logs
    fn name(&self) -> &'static str;

    /// Polarity of `text`; callers clamp the result into [-1.0, 1.0]
    fn polarity(&self, text: &str) -> Result<f64, EnrichmentError>;
}

/// Entity as reported by a model, before label filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntity {
    pub text: String,
    pub label: String,
}

impl RawEntity {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// Named-entity model
pub trait EntityExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entities in order of appearance, any label
    fn extract(&self, text: &str) -> Result<Vec<RawEntity>, EntityError>;
}

/// Whether entity extraction can run in this process
#[derive(Clone)]
pub enum EntityCapability {
    Available(Arc<dyn EntityExtractor>),
    Unavailable { reason: String },
}

impl EntityCapability {
    /// Resolve the configured entity model
    ///
    /// A model that fails to load leaves the capability unavailable; it is
    /// never an error for the service.
    pub fn load(source: &EntityModelSource) -> Self {
        let loaded = match source {
            EntityModelSource::Disabled => {
                info!("Entity extraction disabled by configuration");
                return Self::unavailable("disabled by configuration");
            }
            EntityModelSource::Builtin => GazetteerExtractor::builtin(),
            EntityModelSource::Gazetteer(path) => GazetteerExtractor::load(path),
        };

        match loaded {
            Ok(gazetteer) => {
                info!("Entity extraction available ({} gazetteer phrases)", gazetteer.len());
                Self::Available(Arc::new(gazetteer))
            }
            Err(e) => {
                warn!("Entity extraction unavailable: {}", e);
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// Status string for the liveness report
    pub fn status(&self) -> &'static str {
        match self {
            Self::Available(_) => "available",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

impl std::fmt::Debug for EntityCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(extractor) => write!(f, "Available({})", extractor.name()),
            Self::Unavailable { reason } => write!(f, "Unavailable({})", reason),
        }
    }
}

/// Analysis results for one mention
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub sentiment_score: f64,
    pub entities: Vec<Entity>,
}

/// Runs the sentiment model and, when available, the entity model
pub struct Enricher {
    sentiment: Arc<dyn SentimentScorer>,
    entities: EntityCapability,
}

impl Enricher {
    pub fn new(sentiment: Arc<dyn SentimentScorer>, entities: EntityCapability) -> Self {
        Self {
            sentiment,
            entities,
        }
    }

    /// Lexicon sentiment plus the configured entity model
    pub fn from_config(entity_model: &EntityModelSource) -> Self {
        Self::new(
            Arc::new(LexiconSentiment::new()),
            EntityCapability::load(entity_model),
        )
    }

    pub fn entity_capability(&self) -> &EntityCapability {
        &self.entities
    }

    /// Score and tag one mention text
    ///
    /// Only sentiment failures are errors. Entity model failures are logged
    /// and yield an empty list.
    pub fn enrich(&self, text: &str) -> Result<Enrichment, EnrichmentError> {
        Ok(Enrichment {
            sentiment_score: self.sentiment_score(text)?,
            entities: self.extract_entities(text),
        })
    }

    fn sentiment_score(&self, text: &str) -> Result<f64, EnrichmentError> {
        if text.trim().is_empty() {
            return Ok(0.0);
        }

        let score = self.sentiment.polarity(text)?;
        if !score.is_finite() {
            return Err(EnrichmentError::NonFiniteScore {
                model: self.sentiment.name(),
            });
        }
        Ok(score.clamp(-1.0, 1.0))
    }

    fn extract_entities(&self, text: &str) -> Vec<Entity> {
        let extractor = match &self.entities {
            EntityCapability::Available(extractor) => extractor,
            EntityCapability::Unavailable { .. } => return Vec::new(),
        };

        if text.trim().is_empty() {
            return Vec::new();
        }

        match extractor.extract(text) {
            Ok(raw) => raw
                .into_iter()
                .filter_map(|e| EntityLabel::from_model_label(&e.label).map(|l| Entity::new(e.text, l)))
                .collect(),
            Err(e) => {
                warn!(extractor = extractor.name(), error = %e, "Entity extraction failed, storing no entities");
                Vec::new()
            }
        }
    }
}
