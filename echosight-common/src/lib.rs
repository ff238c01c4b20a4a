//! # EchoSight Common Library
//!
//! Shared code for the EchoSight services including:
//! - Mention and enriched record types
//! - Store initialization and schema reconciliation
//! - Configuration loading
//! - Error types

pub mod config;
pub mod db;
pub mod error;
pub mod mention;

pub use error::{Error, Result};
pub use mention::{EnrichedRecord, Entity, EntityLabel, MentionEvent};
