//! Service wiring.
//!
//! One owned object constructed at startup holds the registry, adapters,
//! transcript pipeline, and event router; handlers receive it explicitly.

use crate::adapters::broadcast::ChannelBroadcaster;
use crate::adapters::services::{EmbeddingClient, HttpIndex, InferenceService};
use crate::adapters::storage::SqliteIndex;
use crate::config::AppConfig;
use crate::domain::models::Utterance;
use crate::error::Result;
use crate::ports::broadcast::BroadcasterPort;
use crate::ports::index::IndexWriterPort;
use crate::ports::search::SearcherPort;
use crate::ports::summarize::SummarizerPort;
use crate::rtms::events::SessionEvent;
use crate::rtms::registry::ConnectionRegistry;
use crate::rtms::router::EventRouter;
use crate::transcript::TranscriptPipeline;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything the HTTP surface and the dispatcher need
pub struct AppService {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub index: Arc<dyn IndexWriterPort>,
    pub searcher: Arc<dyn SearcherPort>,
    pub summarizer: Option<Arc<dyn SummarizerPort>>,
    pub broadcaster: Arc<dyn BroadcasterPort>,
    pub pipeline: Arc<TranscriptPipeline>,
    pub router: EventRouter,
}

impl AppService {
    /// Wires adapters from configuration.
    ///
    /// An external index endpoint owns writes and search when configured;
    /// otherwise the embedded SQLite adapter does both. Also returns the
    /// session event stream for [`AppService::spawn_event_dispatcher`].
    pub fn build(config: AppConfig) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let embedder = config.inference.as_ref().map(EmbeddingClient::new);

        let (index, searcher): (Arc<dyn IndexWriterPort>, Arc<dyn SearcherPort>) =
            match &config.index {
                Some(endpoint) => {
                    let http = Arc::new(HttpIndex::new(endpoint, embedder));
                    (Arc::clone(&http) as _, http as _)
                }
                None => {
                    let sqlite = Arc::new(SqliteIndex::new(config.db_path.clone().into())?);
                    sqlite.run_migrations()?;
                    (Arc::clone(&sqlite) as _, sqlite as _)
                }
            };

        let summarizer: Option<Arc<dyn SummarizerPort>> = config.inference.as_ref().map(|cfg| {
            Arc::new(InferenceService::new(cfg.clone(), Arc::clone(&index))) as _
        });

        Self::assemble(Arc::new(config), index, searcher, summarizer)
    }

    /// Wiring with explicit adapters, used by tests
    pub fn with_adapters(
        config: Arc<AppConfig>,
        index: Arc<dyn IndexWriterPort>,
        searcher: Arc<dyn SearcherPort>,
        summarizer: Option<Arc<dyn SummarizerPort>>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        Self::assemble(config, index, searcher, summarizer)
    }

    fn assemble(
        config: Arc<AppConfig>,
        index: Arc<dyn IndexWriterPort>,
        searcher: Arc<dyn SearcherPort>,
        summarizer: Option<Arc<dyn SummarizerPort>>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster: Arc<dyn BroadcasterPort> = Arc::new(ChannelBroadcaster::new());
        let pipeline = TranscriptPipeline::new(
            Arc::clone(&index),
            summarizer.clone(),
            Arc::clone(&broadcaster),
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&index),
            Arc::clone(&pipeline),
            events_tx,
        );

        let service = Arc::new(Self {
            config,
            registry,
            index,
            searcher,
            summarizer,
            broadcaster,
            pipeline,
            router,
        });
        Ok((service, events_rx))
    }

    /// Consumes session events: transcripts feed the buffer, the lighter
    /// event kinds fan out to live clients, errors go to the log.
    pub fn spawn_event_dispatcher(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                service.dispatch(event).await;
            }
            log::debug!("session event stream ended");
        })
    }

    async fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::Transcript(frame) => {
                let meeting = frame.info.meeting_uuid.clone();
                let utterance = Utterance {
                    speaker_id: frame.user_id.to_string(),
                    speaker_name: frame.user_name.clone(),
                    text: frame.text.clone(),
                    timestamp: frame.timestamp,
                };
                if !utterance.text.trim().is_empty() {
                    self.pipeline.append(&meeting, utterance).await;
                }
                if let Ok(mut value) = serde_json::to_value(&frame) {
                    value["type"] = serde_json::Value::from("transcript");
                    self.broadcaster.publish(&meeting, value);
                }
            }
            SessionEvent::Chat(frame) => {
                if let Ok(mut value) = serde_json::to_value(&frame) {
                    value["type"] = serde_json::Value::from("chat");
                    self.broadcaster.publish(&frame.info.meeting_uuid, value);
                }
            }
            SessionEvent::Event { ref info, .. }
            | SessionEvent::StreamStateChanged { ref info, .. }
            | SessionEvent::SessionStateChanged { ref info, .. } => {
                let meeting = info.meeting_uuid.clone();
                if let Ok(value) = serde_json::to_value(&event) {
                    self.broadcaster.publish(&meeting, value);
                }
            }
            SessionEvent::Error { info, error } => {
                log::warn!(
                    "stream {} error [{}/{}]: {}",
                    info.stream_id,
                    error.code,
                    error.category,
                    error.message
                );
                if let Ok(value) = serde_json::to_value(&error) {
                    self.broadcaster.publish(
                        &info.meeting_uuid,
                        serde_json::json!({"type": "error", "error": value}),
                    );
                }
            }
            // Raw media frames are consumed by metadata tracking in the
            // media task; they are not fanned out to clients
            SessionEvent::Audio(_) | SessionEvent::Video(_) | SessionEvent::ShareScreen(_) => {}
        }
    }

    /// Stops every live session and flushes all transcript buffers
    pub async fn shutdown(&self) {
        log::info!("Shutting down: stopping {} sessions", self.registry.len());
        for handle in self.registry.clear() {
            handle.stop();
        }
        self.pipeline.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{MockIndex, MockSearcher, MockSummarizer};
    use crate::rtms::events::{StreamInfo, TranscriptFrame};
    use crate::domain::models::ProductKind;

    fn test_config() -> Arc<AppConfig> {
        let lookup = |key: &str| match key {
            "RTMS_CLIENT_ID" => Some("c".to_string()),
            "RTMS_CLIENT_SECRET" => Some("s".to_string()),
            "RTMS_SECRET_TOKEN" => Some("t".to_string()),
            _ => None,
        };
        Arc::new(AppConfig::from_lookup(&lookup).unwrap())
    }

    fn transcript_frame(text: &str) -> SessionEvent {
        SessionEvent::Transcript(TranscriptFrame {
            info: StreamInfo {
                meeting_uuid: "M1".to_string(),
                stream_id: "S1".to_string(),
                product: ProductKind::Meeting,
            },
            user_id: 7,
            user_name: "Ada".to_string(),
            text: text.to_string(),
            timestamp: 1_000,
            start_time: Some(900),
            end_time: Some(1_100),
            language: Some("en".to_string()),
            attribute: None,
        })
    }

    #[tokio::test]
    async fn test_transcript_events_reach_buffer() {
        let index = MockIndex::new();
        let (service, _rx) = AppService::with_adapters(
            test_config(),
            Arc::new(index.clone()),
            Arc::new(MockSearcher::default()),
            Some(Arc::new(MockSummarizer::default())),
        )
        .unwrap();

        service.dispatch(transcript_frame("hello")).await;
        assert_eq!(service.pipeline.buffer_count().await, 1);
        assert_eq!(index.speaker_transcripts.lock().unwrap().len(), 1);

        // Empty transcript frames are not buffered
        service.dispatch(transcript_frame("   ")).await;
        assert_eq!(index.speaker_transcripts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_buffers() {
        let index = MockIndex::new();
        let (service, _rx) = AppService::with_adapters(
            test_config(),
            Arc::new(index.clone()),
            Arc::new(MockSearcher::default()),
            None,
        )
        .unwrap();

        service.dispatch(transcript_frame("hello")).await;
        service.shutdown().await;

        assert_eq!(service.pipeline.buffer_count().await, 0);
        assert_eq!(index.chunks.lock().unwrap().len(), 1);
    }
}
