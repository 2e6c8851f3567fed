//! Inference service adapter
//!
//! Talks to an OpenAI-compatible endpoint for chat completions and
//! embeddings. Owns the per-speaker summary merge: prior summary plus new
//! speech in, `{summary, topics}` out, with tolerant JSON extraction from
//! model replies that wrap the object in fences or prose.

use crate::config::InferenceConfig;
use crate::domain::PromptTemplates;
use crate::error::{AppError, Result};
use crate::ports::index::IndexWriterPort;
use crate::ports::summarize::{SpeakerSummary, SummarizeRequest, SummarizerPort};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// OpenAI-compatible inference client
pub struct InferenceService {
    client: Client,
    config: InferenceConfig,
    index: Arc<dyn IndexWriterPort>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl InferenceService {
    /// Create a new inference service
    pub fn new(config: InferenceConfig, index: Arc<dyn IndexWriterPort>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            config,
            index,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    /// One chat completion round-trip
    async fn chat_completion(&self, prompt: &str) -> Result<String> {
        let request_body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.3,
            max_tokens: 1024,
        };

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/chat/completions", self.config.url)),
            )
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::Inference(format!("Completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Inference(format!(
                "Completion request failed: {}",
                error_text
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Inference(format!("Failed to parse completion: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AppError::Inference("No completion choices returned".to_string()))
    }

}

/// Standalone embedding client, used by the HTTP index adapter.
///
/// Separate from [`InferenceService`] so the index can embed without a
/// dependency cycle through the summariser.
#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl EmbeddingClient {
    pub fn new(config: &InferenceConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
        }
    }

    /// Embed one text for semantic indexing
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request_body = EmbeddingsRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let mut request = self.client.post(format!("{}/embeddings", self.url));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::Inference(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Inference(format!(
                "Embedding request failed: {}",
                error_text
            )));
        }

        let embeddings: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| AppError::Inference(format!("Failed to parse embeddings: {}", e)))?;

        embeddings
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::Inference("No embedding returned".to_string()))
    }
}

/// Pulls the first JSON object out of a model reply.
///
/// Accepts a bare object, a ```json fenced block, or an object embedded in
/// surrounding prose.
pub fn extract_json_object(reply: &str) -> Option<serde_json::Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    // Fenced block
    if let Some(open) = trimmed.find("```") {
        let after = &trimmed[open + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(close) = after.find("```") {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(after[..close].trim()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    // First balanced object in prose; brace counting skips string contents
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[async_trait]
impl SummarizerPort for InferenceService {
    async fn summarize(&self, request: &SummarizeRequest) -> Result<SpeakerSummary> {
        // Merge against whatever summary the index already holds
        let prior = self
            .index
            .get_speaker_context(&request.meeting_id, &request.speaker_id)
            .await
            .unwrap_or(None);
        let prior_summary = prior
            .as_ref()
            .map(|c| c.summary.clone())
            .unwrap_or_default();

        let prompt = PromptTemplates::speaker_summary()
            .replace("{speaker_name}", &request.speaker_name)
            .replace("{prior_summary}", &prior_summary)
            .replace("{recent_text}", &request.recent_text);

        let reply = self.chat_completion(&prompt).await?;

        match extract_json_object(&reply) {
            Some(value) => {
                let summary = value
                    .get("summary")
                    .and_then(|s| s.as_str())
                    .unwrap_or(reply.trim())
                    .to_string();
                let topics = value
                    .get("topics")
                    .and_then(|t| t.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|i| i.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(SpeakerSummary { summary, topics })
            }
            None => {
                // Model ignored the format; keep the text, keep old topics
                log::warn!(
                    "Summariser reply for {}-{} was not JSON; using raw text",
                    request.meeting_id,
                    request.speaker_id
                );
                Ok(SpeakerSummary {
                    summary: reply.trim().to_string(),
                    topics: prior.map(|c| c.topics).unwrap_or_default(),
                })
            }
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat_completion(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bare_object() {
        let value = extract_json_object(r#"{"summary": "s", "topics": ["a"]}"#).unwrap();
        assert_eq!(value["summary"], "s");
    }

    #[test]
    fn test_extract_fenced_object() {
        let reply = "Here you go:\n```json\n{\"summary\": \"fenced\", \"topics\": []}\n```";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["summary"], "fenced");
    }

    #[test]
    fn test_extract_object_from_prose() {
        let reply = "Sure! The result is {\"summary\": \"inline {nested}\", \"topics\": [\"x\"]} as requested.";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["summary"], "inline {nested}");
        assert_eq!(value["topics"][0], "x");
    }

    #[test]
    fn test_extract_handles_braces_inside_strings() {
        let reply = r#"{"summary": "uses } and { inside", "topics": []}"#;
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["summary"], "uses } and { inside");
    }

    #[test]
    fn test_extract_rejects_non_json() {
        assert!(extract_json_object("no structured data here").is_none());
        assert!(extract_json_object("broken { \"a\": ").is_none());
    }
}
