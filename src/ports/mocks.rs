//! Mock implementations for testing

use crate::domain::models::{ContentChunk, MeetingMapping, SpeakerContext, Utterance};
use crate::error::{AppError, Result};
use crate::ports::broadcast::BroadcasterPort;
use crate::ports::index::IndexWriterPort;
use crate::ports::search::{SearchHit, SearcherPort};
use crate::ports::summarize::{SpeakerSummary, SummarizeRequest, SummarizerPort};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// In-memory index implementation for testing
#[derive(Clone, Default)]
pub struct MockIndex {
    pub chunks: Arc<Mutex<Vec<ContentChunk>>>,
    pub contexts: Arc<Mutex<HashMap<String, SpeakerContext>>>,
    pub mappings: Arc<Mutex<HashMap<i64, MeetingMapping>>>,
    pub speaker_transcripts: Arc<Mutex<Vec<(String, Utterance)>>>,
}

impl MockIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexWriterPort for MockIndex {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<()> {
        self.chunks.lock().unwrap().push(chunk.clone());
        Ok(())
    }

    async fn upsert_speaker_context(&self, context: &SpeakerContext) -> Result<()> {
        self.contexts
            .lock()
            .unwrap()
            .insert(context.doc_id(), context.clone());
        Ok(())
    }

    async fn persist_meeting_mapping(&self, mapping: &MeetingMapping) -> Result<()> {
        self.mappings
            .lock()
            .unwrap()
            .insert(mapping.meeting_id, mapping.clone());
        Ok(())
    }

    async fn resolve_meeting_uuid(&self, meeting_id: i64) -> Result<Option<String>> {
        Ok(self
            .mappings
            .lock()
            .unwrap()
            .get(&meeting_id)
            .map(|m| m.uuid.clone()))
    }

    async fn get_speaker_context(
        &self,
        meeting_id: &str,
        speaker_id: &str,
    ) -> Result<Option<SpeakerContext>> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .get(&format!("{}-{}", meeting_id, speaker_id))
            .cloned())
    }

    async fn list_chunks(&self, meeting_id: &str, limit: usize) -> Result<Vec<ContentChunk>> {
        let mut chunks: Vec<ContentChunk> = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.meeting_id == meeting_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.start_time);
        chunks.truncate(limit);
        Ok(chunks)
    }

    async fn list_meeting_speakers(&self, meeting_id: &str) -> Result<Vec<(String, String)>> {
        let mut speakers: Vec<(String, String)> = Vec::new();
        for chunk in self.chunks.lock().unwrap().iter() {
            if chunk.meeting_id != meeting_id {
                continue;
            }
            for (id, name) in chunk.speaker_ids.iter().zip(chunk.speaker_names.iter()) {
                if !speakers.iter().any(|(existing, _)| existing == id) {
                    speakers.push((id.clone(), name.clone()));
                }
            }
        }
        Ok(speakers)
    }

    async fn append_speaker_transcript(
        &self,
        meeting_id: &str,
        utterance: &Utterance,
    ) -> Result<()> {
        self.speaker_transcripts
            .lock()
            .unwrap()
            .push((meeting_id.to_string(), utterance.clone()));
        Ok(())
    }
}

/// Searcher returning canned hits
#[derive(Clone, Default)]
pub struct MockSearcher {
    pub hits: Arc<Mutex<Vec<SearchHit>>>,
}

#[async_trait]
impl SearcherPort for MockSearcher {
    async fn semantic_search(
        &self,
        _query: &str,
        meeting_uuid: Option<&str>,
        _speaker_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|h| meeting_uuid.map_or(true, |m| h.chunk.meeting_id == m))
            .cloned()
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Summariser echoing the request without calling a model
#[derive(Clone, Default)]
pub struct MockSummarizer {
    pub requests: Arc<Mutex<Vec<SummarizeRequest>>>,
    pub fail: Arc<Mutex<bool>>,
}

#[async_trait]
impl SummarizerPort for MockSummarizer {
    async fn summarize(&self, request: &SummarizeRequest) -> Result<SpeakerSummary> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::Inference("mock failure".to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(SpeakerSummary {
            summary: format!("summary of {}", request.recent_text),
            topics: vec!["mock".to_string()],
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::Inference("mock failure".to_string()));
        }
        Ok(format!("completion for: {}", prompt.len()))
    }
}

/// Broadcaster recording every published event
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub published: Mutex<Vec<(String, Value)>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl BroadcasterPort for RecordingBroadcaster {
    fn publish(&self, meeting_uuid: &str, event: Value) {
        self.published
            .lock()
            .unwrap()
            .push((meeting_uuid.to_string(), event.clone()));
        if let Some(sender) = self.channels.lock().unwrap().get(meeting_uuid) {
            let _ = sender.send(event);
        }
    }

    fn subscribe(&self, meeting_uuid: &str) -> broadcast::Receiver<Value> {
        self.channels
            .lock()
            .unwrap()
            .entry(meeting_uuid.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    fn close_meeting(&self, meeting_uuid: &str) {
        self.channels.lock().unwrap().remove(meeting_uuid);
    }
}
