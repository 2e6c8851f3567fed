/// Summariser port trait
///
/// Wraps the completion endpoint used for per-speaker summaries and chat
/// answers. The implementation owns prior-summary merging and robust JSON
/// extraction from model replies.
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One summarisation trigger forwarded from the transcript buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub meeting_id: String,
    pub speaker_id: String,
    pub speaker_name: String,
    pub recent_text: String,
    pub segment_count: u64,
}

/// Merged summary produced by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeakerSummary {
    pub summary: String,
    pub topics: Vec<String>,
}

/// Port trait for the summarisation/completion service
#[async_trait]
pub trait SummarizerPort: Send + Sync {
    /// Merge the speaker's prior summary with `recent_text`
    async fn summarize(&self, request: &SummarizeRequest) -> Result<SpeakerSummary>;

    /// Free-form completion used by the chat endpoint
    async fn complete(&self, prompt: &str) -> Result<String>;
}
