//! External service adapters
//!
//! Implementations of the summariser and search-index ports:
//! - Inference: OpenAI-compatible completion + embedding endpoint
//! - HttpIndex: JSON-over-HTTP search index with semantic retrieval

pub mod http_index;
pub mod inference;

pub use http_index::HttpIndex;
pub use inference::{EmbeddingClient, InferenceService};
