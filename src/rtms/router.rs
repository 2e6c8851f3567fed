//! Lifecycle event routing.
//!
//! Single entry point for webhook events: URL validation answers
//! synchronously, `rtms_started`/`rtms_stopped` manage sessions. The
//! numeric↔uuid meeting mapping is cached in memory and written through
//! to the index.

use crate::config::AppConfig;
use crate::domain::models::{MeetingMapping, ProductKind};
use crate::error::{AppError, Result};
use crate::ports::index::IndexWriterPort;
use crate::rtms::events::SessionEvent;
use crate::rtms::registry::ConnectionRegistry;
use crate::rtms::session::{self, SessionConfig};
use crate::transcript::TranscriptPipeline;
use crate::wire::signature::{self, ValidationResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Result of dispatching one webhook event
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// Synchronous reply body for `endpoint.url_validation`
    Validation(ValidationResponse),
    /// Event accepted; processing continues asynchronously
    Accepted,
    /// Unrecognised event name
    Ignored,
}

/// Bidirectional in-memory mapping cache
#[derive(Default)]
struct MappingCache {
    by_id: HashMap<i64, String>,
    by_uuid: HashMap<String, i64>,
}

/// Dispatches lifecycle events to sessions
pub struct EventRouter {
    config: Arc<AppConfig>,
    registry: Arc<ConnectionRegistry>,
    index: Arc<dyn IndexWriterPort>,
    pipeline: Arc<TranscriptPipeline>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cache: Mutex<MappingCache>,
}

impl EventRouter {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<ConnectionRegistry>,
        index: Arc<dyn IndexWriterPort>,
        pipeline: Arc<TranscriptPipeline>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            registry,
            index,
            pipeline,
            events,
            cache: Mutex::new(MappingCache::default()),
        }
    }

    /// Dispatches one webhook event by name
    pub async fn handle_event(&self, event: &str, payload: &Value) -> Result<WebhookOutcome> {
        if event == "endpoint.url_validation" {
            return self.handle_validation(payload);
        }

        let Some((prefix, action)) = event.split_once('.') else {
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(product) = ProductKind::from_event_prefix(prefix) else {
            log::debug!("Ignoring event with unknown product prefix: {}", event);
            return Ok(WebhookOutcome::Ignored);
        };

        match action {
            "rtms_started" => self.handle_started(product, payload).await,
            "rtms_stopped" => self.handle_stopped(payload).await,
            _ => Ok(WebhookOutcome::Ignored),
        }
    }

    fn handle_validation(&self, payload: &Value) -> Result<WebhookOutcome> {
        let plain_token = payload
            .get("plainToken")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidInput("url_validation without plainToken".into()))?;
        let credentials = self
            .config
            .credentials_for(ProductKind::Meeting)
            .ok_or_else(|| AppError::Config("no credentials for validation".into()))?;
        Ok(WebhookOutcome::Validation(signature::validation_response(
            plain_token,
            &credentials.secret_token,
        )))
    }

    async fn handle_started(&self, product: ProductKind, payload: &Value) -> Result<WebhookOutcome> {
        let meeting_uuid = required_str(payload, "meeting_uuid")?;
        let stream_id = required_str(payload, "rtms_stream_id")?;
        let server_url = required_str(payload, "server_urls")?;

        // Re-issuing a started event for a live stream is a no-op
        if self.registry.has(stream_id) {
            log::info!("Stream {} already has a live session; ignoring", stream_id);
            return Ok(WebhookOutcome::Accepted);
        }

        let Some(credentials) = self.config.credentials_for(product) else {
            log::warn!("No credentials for product {}; dropping event", product);
            return Ok(WebhookOutcome::Ignored);
        };

        if let Some(meeting_id) = payload.get("meeting_id").and_then(Value::as_i64) {
            self.persist_mapping(meeting_id, meeting_uuid).await;
        }

        let handle = session::spawn(
            SessionConfig {
                stream_id: stream_id.to_string(),
                meeting_uuid: meeting_uuid.to_string(),
                server_url: server_url.to_string(),
                product,
                credentials: credentials.clone(),
                media_mask: self.config.media_mask,
                enable_fillers: self.config.enable_fillers,
            },
            self.events.clone(),
            Arc::clone(&self.registry),
        );

        if !self.registry.add(handle.clone()) {
            // Lost a race with another started event; keep the existing one
            handle.stop();
        } else {
            log::info!(
                "Created session for stream {} (meeting {}, product {})",
                stream_id,
                meeting_uuid,
                product
            );
        }
        Ok(WebhookOutcome::Accepted)
    }

    async fn handle_stopped(&self, payload: &Value) -> Result<WebhookOutcome> {
        let stream_id = required_str(payload, "rtms_stream_id")?;
        let meeting_uuid = match self.registry.get(stream_id) {
            Some(handle) => {
                let uuid = handle.meeting_uuid().to_string();
                handle.stop();
                uuid
            }
            None => match payload.get("meeting_uuid").and_then(Value::as_str) {
                Some(uuid) => uuid.to_string(),
                None => {
                    log::warn!("rtms_stopped for unknown stream {}", stream_id);
                    return Ok(WebhookOutcome::Accepted);
                }
            },
        };

        // Flush the meeting's transcript buffer once its stream stops
        self.pipeline.destroy(&meeting_uuid).await;

        if let Some(meeting_id) = self.numeric_id_for(&meeting_uuid) {
            let mapping = MeetingMapping {
                meeting_id,
                uuid: meeting_uuid.clone(),
                start_time: None,
                end_time: Some(chrono::Utc::now().timestamp_millis()),
                status: "ended".to_string(),
            };
            if let Err(error) = self.index.persist_meeting_mapping(&mapping).await {
                log::warn!("meeting mapping close failed: {}", error);
            }
        }

        log::info!("Stopped stream {} (meeting {})", stream_id, meeting_uuid);
        Ok(WebhookOutcome::Accepted)
    }

    /// Updates the cache and writes the mapping through to the index
    async fn persist_mapping(&self, meeting_id: i64, uuid: &str) {
        {
            let mut cache = self.cache.lock().unwrap();
            cache.by_id.insert(meeting_id, uuid.to_string());
            cache.by_uuid.insert(uuid.to_string(), meeting_id);
        }
        let mapping = MeetingMapping::started(meeting_id, uuid.to_string());
        if let Err(error) = self.index.persist_meeting_mapping(&mapping).await {
            log::warn!(
                "meeting mapping write-through failed for {}: {}",
                meeting_id,
                error
            );
        }
    }

    /// Resolves a numeric meeting id, consulting the cache then the index;
    /// successful index lookups are cached.
    pub async fn resolve_meeting_uuid(&self, meeting_id: i64) -> Option<String> {
        if let Some(uuid) = self.cache.lock().unwrap().by_id.get(&meeting_id) {
            return Some(uuid.clone());
        }
        match self.index.resolve_meeting_uuid(meeting_id).await {
            Ok(Some(uuid)) => {
                let mut cache = self.cache.lock().unwrap();
                cache.by_id.insert(meeting_id, uuid.clone());
                cache.by_uuid.insert(uuid.clone(), meeting_id);
                Some(uuid)
            }
            Ok(None) => None,
            Err(error) => {
                log::warn!("mapping lookup failed for {}: {}", meeting_id, error);
                None
            }
        }
    }

    pub fn numeric_id_for(&self, uuid: &str) -> Option<i64> {
        self.cache.lock().unwrap().by_uuid.get(uuid).copied()
    }
}

fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidInput(format!("payload missing {}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::ports::mocks::{MockIndex, RecordingBroadcaster};
    use serde_json::json;

    fn test_config() -> Arc<AppConfig> {
        let lookup = |key: &str| match key {
            "RTMS_CLIENT_ID" => Some("client0".to_string()),
            "RTMS_CLIENT_SECRET" => Some("secret0".to_string()),
            "RTMS_SECRET_TOKEN" => Some("s".to_string()),
            _ => None,
        };
        Arc::new(AppConfig::from_lookup(&lookup).unwrap())
    }

    fn router() -> (EventRouter, Arc<ConnectionRegistry>, MockIndex) {
        let registry = Arc::new(ConnectionRegistry::new());
        let index = MockIndex::new();
        let pipeline = TranscriptPipeline::new(
            Arc::new(index.clone()),
            None,
            Arc::new(RecordingBroadcaster::default()),
        );
        let (events, _rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(
            test_config(),
            Arc::clone(&registry),
            Arc::new(index.clone()),
            pipeline,
            events,
        );
        (router, registry, index)
    }

    #[tokio::test]
    async fn test_url_validation_reply() {
        let (router, _, _) = router();
        let outcome = router
            .handle_event("endpoint.url_validation", &json!({"plainToken": "abc123"}))
            .await
            .unwrap();
        match outcome {
            WebhookOutcome::Validation(response) => {
                assert_eq!(response.plain_token, "abc123");
                assert_eq!(
                    response.encrypted_token,
                    "98a67abc7dc8e094098463fcecc56f07d3a485853a8890c79f78161e26fc5a87"
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_started_creates_one_session_and_reissue_is_noop() {
        let (router, registry, _) = router();
        let payload = json!({
            "meeting_uuid": "UUID-A",
            "rtms_stream_id": "S1",
            "server_urls": "ws://127.0.0.1:9",
            "meeting_id": 111
        });

        router
            .handle_event("meeting.rtms_started", &payload)
            .await
            .unwrap();
        assert!(registry.has("S1"));
        assert_eq!(registry.len(), 1);

        // Known started event while the session is live is a no-op
        router
            .handle_event("meeting.rtms_started", &payload)
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_started_persists_mapping() {
        let (router, _, index) = router();
        let payload = json!({
            "meeting_uuid": "UUID-A",
            "rtms_stream_id": "S1",
            "server_urls": "ws://127.0.0.1:9",
            "meeting_id": 111
        });
        router
            .handle_event("meeting.rtms_started", &payload)
            .await
            .unwrap();

        assert_eq!(
            index.mappings.lock().unwrap().get(&111).map(|m| m.uuid.clone()),
            Some("UUID-A".to_string())
        );
        assert_eq!(router.resolve_meeting_uuid(111).await, Some("UUID-A".to_string()));
        assert_eq!(router.numeric_id_for("UUID-A"), Some(111));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_index_and_caches() {
        let (router, _, index) = router();
        index.mappings.lock().unwrap().insert(
            222,
            MeetingMapping::started(222, "UUID-B".to_string()),
        );

        assert_eq!(router.resolve_meeting_uuid(222).await, Some("UUID-B".to_string()));
        // Cached for the reverse direction too
        assert_eq!(router.numeric_id_for("UUID-B"), Some(222));
        assert_eq!(router.resolve_meeting_uuid(404).await, None);
    }

    #[tokio::test]
    async fn test_unknown_events_ignored() {
        let (router, _, _) = router();
        assert!(matches!(
            router.handle_event("meeting.ended", &json!({})).await.unwrap(),
            WebhookOutcome::Ignored
        ));
        assert!(matches!(
            router.handle_event("bogus", &json!({})).await.unwrap(),
            WebhookOutcome::Ignored
        ));
    }

    #[tokio::test]
    async fn test_stopped_for_unknown_stream_is_accepted() {
        let (router, _, _) = router();
        let outcome = router
            .handle_event("meeting.rtms_stopped", &json!({"rtms_stream_id": "S9"}))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Accepted));
    }
}
