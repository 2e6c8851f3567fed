/// Searcher port trait
///
/// Semantic retrieval over indexed transcript chunks. Implementations may
/// fall back to lexical search when the embedding path is unavailable;
/// callers treat that as a soft failure.
use crate::domain::models::ContentChunk;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One ranked retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: ContentChunk,
    pub score: f32,
}

/// Port trait for semantic search
#[async_trait]
pub trait SearcherPort: Send + Sync {
    /// Ranked chunks matching `query`, optionally scoped to a meeting
    /// and/or speaker
    async fn semantic_search(
        &self,
        query: &str,
        meeting_uuid: Option<&str>,
        speaker_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}
