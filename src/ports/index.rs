/// Index writer port trait
///
/// Defines the write/read surface of the durable index the core emits
/// chunks and speaker context into.
/// Implementations: SQLite adapter, HTTP search-index adapter
use crate::domain::models::{ContentChunk, MeetingMapping, SpeakerContext, Utterance};
use crate::error::Result;
use async_trait::async_trait;

/// Port trait for index operations
#[async_trait]
pub trait IndexWriterPort: Send + Sync {
    /// Insert a flushed content chunk
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<()>;

    /// Create or replace a speaker context document
    async fn upsert_speaker_context(&self, context: &SpeakerContext) -> Result<()>;

    /// Write-through persistence of the numeric↔uuid meeting mapping
    async fn persist_meeting_mapping(&self, mapping: &MeetingMapping) -> Result<()>;

    /// Resolve a numeric meeting id to its session uuid
    async fn resolve_meeting_uuid(&self, meeting_id: i64) -> Result<Option<String>>;

    /// Fetch one speaker context document
    async fn get_speaker_context(
        &self,
        meeting_id: &str,
        speaker_id: &str,
    ) -> Result<Option<SpeakerContext>>;

    /// Chunks for a meeting sorted by start time, bounded by `limit`
    async fn list_chunks(&self, meeting_id: &str, limit: usize) -> Result<Vec<ContentChunk>>;

    /// Distinct `(speaker_id, speaker_name)` pairs seen for a meeting
    async fn list_meeting_speakers(&self, meeting_id: &str) -> Result<Vec<(String, String)>>;

    /// Raw per-speaker utterance record, used for re-indexing
    async fn append_speaker_transcript(&self, meeting_id: &str, utterance: &Utterance)
        -> Result<()>;
}
