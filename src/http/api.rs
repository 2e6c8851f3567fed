//! Meeting/speaker query API.
//!
//! Every endpoint answers JSON on both success and error paths. Chat and
//! search degrade to textual fallbacks when the inference backend is
//! unavailable.

use crate::domain::PromptTemplates;
use crate::ports::search::SearchHit;
use crate::service::AppService;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const CHUNK_LIST_LIMIT: usize = 1000;
const CHAT_HITS: usize = 5;

type ApiResponse = (StatusCode, Json<Value>);

fn ok(value: Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn error(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({"error": message.into()})))
}

/// GET /health
pub async fn health(State(service): State<Arc<AppService>>) -> ApiResponse {
    ok(json!({
        "status": "ok",
        "active_streams": service.registry.len(),
        "archived_streams": service.registry.history_len(),
        "transcript_buffers": service.pipeline.buffer_count().await,
        "inference_configured": service.summarizer.is_some(),
    }))
}

/// GET /api/meeting/:meeting_id/speakers
pub async fn meeting_speakers(
    State(service): State<Arc<AppService>>,
    Path(meeting_id): Path<i64>,
) -> ApiResponse {
    let Some(uuid) = service.router.resolve_meeting_uuid(meeting_id).await else {
        return error(
            StatusCode::NOT_FOUND,
            format!("no mapping for meeting {}", meeting_id),
        );
    };

    match service.index.list_meeting_speakers(&uuid).await {
        Ok(speakers) => ok(json!({
            "meeting_id": meeting_id,
            "uuid": uuid,
            "speakers": speakers
                .into_iter()
                .map(|(id, name)| json!({"speaker_id": id, "speaker_name": name}))
                .collect::<Vec<_>>(),
        })),
        Err(err) => {
            log::warn!("speaker listing failed for {}: {}", uuid, err);
            error(StatusCode::INTERNAL_SERVER_ERROR, "speaker lookup failed")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    #[serde(rename = "meetingId")]
    pub meeting_id: String,
}

/// GET /api/speaker/:speaker_id/context?meetingId=…
pub async fn speaker_context(
    State(service): State<Arc<AppService>>,
    Path(speaker_id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> ApiResponse {
    let meeting_uuid = resolve_meeting(&service, &query.meeting_id).await;
    let Some(meeting_uuid) = meeting_uuid else {
        return error(StatusCode::NOT_FOUND, "unknown meeting");
    };

    match service
        .index
        .get_speaker_context(&meeting_uuid, &speaker_id)
        .await
    {
        Ok(Some(context)) => ok(json!({
            "speaker_id": context.speaker_id,
            "speaker_name": context.speaker_name,
            "meeting_id": context.meeting_id,
            "context_summary": context.summary,
            "topics": context.topics,
            "last_updated": context.last_updated,
            "segment_count": context.segment_count,
        })),
        Ok(None) => ok(json!({
            "speaker_id": speaker_id,
            "meeting_id": meeting_uuid,
            "context_summary": null,
            "topics": [],
            "segment_count": 0,
        })),
        Err(err) => {
            log::warn!("context lookup failed: {}", err);
            error(StatusCode::INTERNAL_SERVER_ERROR, "context lookup failed")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(rename = "meetingId")]
    pub meeting_id: String,
}

/// POST /api/chat/:speaker_id
///
/// RAG over the inference endpoint: the speaker's running summary plus
/// semantic hits become the prompt context.
pub async fn speaker_chat(
    State(service): State<Arc<AppService>>,
    Path(speaker_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResponse {
    if request.question.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "question must not be empty");
    }
    let Some(meeting_uuid) = resolve_meeting(&service, &request.meeting_id).await else {
        return error(StatusCode::NOT_FOUND, "unknown meeting");
    };

    let context = service
        .index
        .get_speaker_context(&meeting_uuid, &speaker_id)
        .await
        .unwrap_or(None);
    let (speaker_name, summary) = context
        .map(|c| (c.speaker_name, c.summary))
        .unwrap_or_else(|| (speaker_id.clone(), String::new()));

    let hits = service
        .searcher
        .semantic_search(
            &request.question,
            Some(&meeting_uuid),
            Some(&speaker_id),
            CHAT_HITS,
        )
        .await
        .unwrap_or_else(|err| {
            log::warn!("chat retrieval failed: {}", err);
            Vec::new()
        });
    let excerpts = render_excerpts(&hits);

    let answer = match &service.summarizer {
        Some(summarizer) => {
            let prompt = PromptTemplates::speaker_chat()
                .replace("{speaker_name}", &speaker_name)
                .replace("{summary}", if summary.is_empty() { "(none yet)" } else { &summary })
                .replace("{excerpts}", if excerpts.is_empty() { "(none found)" } else { &excerpts })
                .replace("{question}", &request.question);
            match summarizer.complete(&prompt).await {
                Ok(answer) => answer,
                Err(err) => {
                    log::warn!("chat completion failed: {}", err);
                    fallback_answer(&speaker_name, &summary, &excerpts)
                }
            }
        }
        None => fallback_answer(&speaker_name, &summary, &excerpts),
    };

    ok(json!({
        "speaker_id": speaker_id,
        "meeting_id": meeting_uuid,
        "question": request.question,
        "answer": answer,
        "sources": hits.iter().map(|h| h.chunk.chunk_id.clone()).collect::<Vec<_>>(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(rename = "meetingId")]
    pub meeting_id: Option<String>,
    #[serde(rename = "speakerId")]
    pub speaker_id: Option<String>,
    pub size: Option<usize>,
}

/// POST /api/semantic-search
pub async fn semantic_search(
    State(service): State<Arc<AppService>>,
    Json(request): Json<SearchRequest>,
) -> ApiResponse {
    if request.query.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "query must not be empty");
    }

    let meeting_uuid = match &request.meeting_id {
        Some(raw) => match resolve_meeting(&service, raw).await {
            Some(uuid) => Some(uuid),
            None => return error(StatusCode::NOT_FOUND, "unknown meeting"),
        },
        None => None,
    };

    match service
        .searcher
        .semantic_search(
            &request.query,
            meeting_uuid.as_deref(),
            request.speaker_id.as_deref(),
            request.size.unwrap_or(10).min(100),
        )
        .await
    {
        Ok(hits) => ok(json!({
            "success": true,
            "hits": hits
                .iter()
                .map(|h| json!({
                    "chunk_id": h.chunk.chunk_id,
                    "meeting_id": h.chunk.meeting_id,
                    "text": h.chunk.text,
                    "speaker_ids": h.chunk.speaker_ids,
                    "start_time": h.chunk.start_time,
                    "end_time": h.chunk.end_time,
                    "score": h.score,
                }))
                .collect::<Vec<_>>(),
        })),
        Err(err) => {
            log::warn!("semantic search failed: {}", err);
            (
                StatusCode::OK,
                Json(json!({"success": false, "error": err.to_string()})),
            )
        }
    }
}

/// GET /api/chunks/:meeting_id
pub async fn meeting_chunks(
    State(service): State<Arc<AppService>>,
    Path(meeting_id): Path<String>,
) -> ApiResponse {
    let Some(meeting_uuid) = resolve_meeting(&service, &meeting_id).await else {
        return error(StatusCode::NOT_FOUND, "unknown meeting");
    };

    match service.index.list_chunks(&meeting_uuid, CHUNK_LIST_LIMIT).await {
        Ok(chunks) => ok(json!({
            "meeting_id": meeting_uuid,
            "count": chunks.len(),
            "chunks": chunks,
        })),
        Err(err) => {
            log::warn!("chunk listing failed for {}: {}", meeting_uuid, err);
            error(StatusCode::INTERNAL_SERVER_ERROR, "chunk listing failed")
        }
    }
}

/// Accepts either the numeric public id or the session uuid
async fn resolve_meeting(service: &AppService, raw: &str) -> Option<String> {
    if let Ok(numeric) = raw.parse::<i64>() {
        return service.router.resolve_meeting_uuid(numeric).await;
    }
    Some(raw.to_string())
}

fn render_excerpts(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| format!("- {}", h.chunk.text.replace('\n', "\n  ")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fallback_answer(speaker_name: &str, summary: &str, excerpts: &str) -> String {
    if summary.is_empty() && excerpts.is_empty() {
        return format!(
            "No indexed material is available for {} yet; try again once they have spoken.",
            speaker_name
        );
    }
    let mut answer = format!("The assistant is offline; here is what we have on {}.", speaker_name);
    if !summary.is_empty() {
        answer.push_str("\n\nSummary: ");
        answer.push_str(summary);
    }
    if !excerpts.is_empty() {
        answer.push_str("\n\nRelevant excerpts:\n");
        answer.push_str(excerpts);
    }
    answer
}
