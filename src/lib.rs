//! RTMS Scribe
//!
//! Real-time meeting media ingestion and enrichment service: lifecycle
//! webhooks create outbound WebSocket sessions to vendor media servers,
//! transcript traffic is buffered into indexable chunks and per-speaker
//! summaries, and a small HTTP API serves the results to meeting clients.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod ports;
pub mod rtms;
pub mod service;
pub mod transcript;
pub mod wire;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use service::AppService;
