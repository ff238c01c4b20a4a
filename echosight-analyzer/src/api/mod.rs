//! HTTP API handlers for echosight-analyzer

pub mod health;

pub use health::health_routes;
