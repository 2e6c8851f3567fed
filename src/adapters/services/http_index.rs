//! HTTP search-index adapter
//!
//! Speaks the JSON document/search dialect of an Elasticsearch-compatible
//! index. Chunks are stored with an embedding vector when the embedding
//! client is configured; semantic search degrades to a lexical match query
//! when the embedding path is unavailable, which callers see only as
//! slightly worse ranking, never as an error.

use crate::adapters::services::inference::EmbeddingClient;
use crate::config::EndpointConfig;
use crate::domain::models::{ContentChunk, MeetingMapping, SpeakerContext, Utterance};
use crate::error::{AppError, Result};
use crate::ports::index::IndexWriterPort;
use crate::ports::search::{SearchHit, SearcherPort};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const CHUNKS_INDEX: &str = "transcript_chunks";
const MEETINGS_INDEX: &str = "meetings";
const CONTEXT_INDEX: &str = "speaker_context";
const SPEAKER_TRANSCRIPTS_INDEX: &str = "speaker_transcripts";

/// Search-index adapter over HTTP
pub struct HttpIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    embedder: Option<EmbeddingClient>,
}

#[derive(Debug, Deserialize)]
struct EsSearchResponse {
    hits: EsHits,
}

#[derive(Debug, Deserialize)]
struct EsHits {
    hits: Vec<EsHit>,
}

#[derive(Debug, Deserialize)]
struct EsHit {
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: Value,
}

impl HttpIndex {
    /// Create a new HTTP index adapter
    pub fn new(config: &EndpointConfig, embedder: Option<EmbeddingClient>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            embedder,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("ApiKey {}", key)),
            None => request,
        }
    }

    async fn put_doc(&self, index: &str, id: &str, doc: &Value) -> Result<()> {
        let response = self
            .authorize(
                self.client
                    .put(format!("{}/{}/_doc/{}", self.base_url, index, id)),
            )
            .json(doc)
            .send()
            .await
            .map_err(|e| AppError::Index(format!("{} write failed: {}", index, e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Index(format!(
                "{} write rejected: {}",
                index, error_text
            )));
        }
        Ok(())
    }

    async fn post_doc(&self, index: &str, doc: &Value) -> Result<()> {
        let response = self
            .authorize(self.client.post(format!("{}/{}/_doc", self.base_url, index)))
            .json(doc)
            .send()
            .await
            .map_err(|e| AppError::Index(format!("{} write failed: {}", index, e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Index(format!(
                "{} write rejected: {}",
                index, error_text
            )));
        }
        Ok(())
    }

    async fn get_doc(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/{}/_doc/{}", self.base_url, index, id)),
            )
            .send()
            .await
            .map_err(|e| AppError::Index(format!("{} read failed: {}", index, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Index(format!(
                "{} read rejected: {}",
                index, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Index(format!("{} read parse failed: {}", index, e)))?;
        Ok(body.get("_source").cloned())
    }

    async fn search(&self, index: &str, query: &Value) -> Result<EsSearchResponse> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/{}/_search", self.base_url, index)),
            )
            .json(query)
            .send()
            .await
            .map_err(|e| AppError::Index(format!("{} search failed: {}", index, e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Index(format!(
                "{} search rejected: {}",
                index, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Index(format!("{} search parse failed: {}", index, e)))
    }

    fn scope_filters(meeting_uuid: Option<&str>, speaker_id: Option<&str>) -> Vec<Value> {
        let mut filters = Vec::new();
        if let Some(meeting) = meeting_uuid {
            filters.push(json!({"term": {"meeting_id": meeting}}));
        }
        if let Some(speaker) = speaker_id {
            filters.push(json!({"term": {"speaker_ids": speaker}}));
        }
        filters
    }

    fn hits_to_chunks(response: EsSearchResponse) -> Vec<SearchHit> {
        response
            .hits
            .hits
            .into_iter()
            .filter_map(|hit| {
                let mut source = hit.source;
                // The stored vector is an implementation detail
                if let Some(obj) = source.as_object_mut() {
                    obj.remove("embedding");
                }
                serde_json::from_value::<ContentChunk>(source)
                    .ok()
                    .map(|chunk| SearchHit {
                        chunk,
                        score: hit.score.unwrap_or(0.0),
                    })
            })
            .collect()
    }
}

#[async_trait]
impl IndexWriterPort for HttpIndex {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<()> {
        let mut doc = serde_json::to_value(chunk)?;

        // Best-effort embedding; a chunk without a vector still serves
        // lexical search
        if let Some(embedder) = &self.embedder {
            match embedder.embed(&chunk.text).await {
                Ok(vector) => {
                    doc["embedding"] = json!(vector);
                }
                Err(error) => {
                    log::warn!("embedding failed for {}: {}", chunk.chunk_id, error);
                }
            }
        }

        self.put_doc(CHUNKS_INDEX, &chunk.chunk_id, &doc).await
    }

    async fn upsert_speaker_context(&self, context: &SpeakerContext) -> Result<()> {
        let doc = serde_json::to_value(context)?;
        self.put_doc(CONTEXT_INDEX, &context.doc_id(), &doc).await
    }

    async fn persist_meeting_mapping(&self, mapping: &MeetingMapping) -> Result<()> {
        let doc = serde_json::to_value(mapping)?;
        self.put_doc(MEETINGS_INDEX, &mapping.meeting_id.to_string(), &doc)
            .await
    }

    async fn resolve_meeting_uuid(&self, meeting_id: i64) -> Result<Option<String>> {
        let doc = self
            .get_doc(MEETINGS_INDEX, &meeting_id.to_string())
            .await?;
        Ok(doc
            .and_then(|d| d.get("uuid").and_then(Value::as_str).map(str::to_string)))
    }

    async fn get_speaker_context(
        &self,
        meeting_id: &str,
        speaker_id: &str,
    ) -> Result<Option<SpeakerContext>> {
        let doc = self
            .get_doc(CONTEXT_INDEX, &format!("{}-{}", meeting_id, speaker_id))
            .await?;
        match doc {
            Some(source) => Ok(serde_json::from_value(source).ok()),
            None => Ok(None),
        }
    }

    async fn list_chunks(&self, meeting_id: &str, limit: usize) -> Result<Vec<ContentChunk>> {
        let query = json!({
            "size": limit,
            "query": {"term": {"meeting_id": meeting_id}},
            "sort": [{"start_time": "asc"}]
        });
        let response = self.search(CHUNKS_INDEX, &query).await?;
        Ok(Self::hits_to_chunks(response)
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }

    async fn list_meeting_speakers(&self, meeting_id: &str) -> Result<Vec<(String, String)>> {
        let chunks = self.list_chunks(meeting_id, 1000).await?;
        let mut speakers: Vec<(String, String)> = Vec::new();
        for chunk in chunks {
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
        let doc = json!({
            "meeting_id": meeting_id,
            "speaker_id": utterance.speaker_id,
            "speaker_name": utterance.speaker_name,
            "text": utterance.text,
            "timestamp": utterance.timestamp,
        });
        self.post_doc(SPEAKER_TRANSCRIPTS_INDEX, &doc).await
    }
}

#[async_trait]
impl SearcherPort for HttpIndex {
    async fn semantic_search(
        &self,
        query: &str,
        meeting_uuid: Option<&str>,
        speaker_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let filters = Self::scope_filters(meeting_uuid, speaker_id);

        // Semantic path first; embedding failure falls back to lexical
        if let Some(embedder) = &self.embedder {
            match embedder.embed(query).await {
                Ok(vector) => {
                    let body = json!({
                        "size": limit,
                        "knn": {
                            "field": "embedding",
                            "query_vector": vector,
                            "k": limit,
                            "num_candidates": limit * 10,
                            "filter": filters,
                        }
                    });
                    let response = self.search(CHUNKS_INDEX, &body).await?;
                    return Ok(Self::hits_to_chunks(response));
                }
                Err(error) => {
                    log::warn!("query embedding failed, using lexical search: {}", error);
                }
            }
        }

        let body = json!({
            "size": limit,
            "query": {
                "bool": {
                    "must": [{"match": {"text": query}}],
                    "filter": filters,
                }
            }
        });
        let response = self.search(CHUNKS_INDEX, &body).await?;
        Ok(Self::hits_to_chunks(response))
    }
}
