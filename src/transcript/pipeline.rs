//! Drives per-meeting transcript buffers and routes their signals to the
//! adapters.
//!
//! Adapter failures are logged and swallowed per item; ingestion never
//! stalls on a slow downstream.

use crate::domain::models::{SpeakerContext, Utterance};
use crate::ports::broadcast::BroadcasterPort;
use crate::ports::index::IndexWriterPort;
use crate::ports::summarize::{SummarizeRequest, SummarizerPort};
use crate::transcript::buffer::{BufferSignal, TranscriptBuffer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const DRIVER_TICK: Duration = Duration::from_secs(1);

/// Owns every live meeting's transcript buffer
pub struct TranscriptPipeline {
    buffers: Mutex<HashMap<String, TranscriptBuffer>>,
    index: Arc<dyn IndexWriterPort>,
    summarizer: Option<Arc<dyn SummarizerPort>>,
    broadcaster: Arc<dyn BroadcasterPort>,
}

impl TranscriptPipeline {
    pub fn new(
        index: Arc<dyn IndexWriterPort>,
        summarizer: Option<Arc<dyn SummarizerPort>>,
        broadcaster: Arc<dyn BroadcasterPort>,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(HashMap::new()),
            index,
            summarizer,
            broadcaster,
        })
    }

    /// Spawns the 1-second trigger-evaluation task
    pub fn spawn_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(DRIVER_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                pipeline.run_tick(Instant::now()).await;
            }
        })
    }

    /// Appends one utterance to its meeting's buffer, creating the buffer
    /// on first use. Also records the raw utterance for re-indexing.
    pub async fn append(&self, meeting_uuid: &str, utterance: Utterance) {
        if let Err(error) = self
            .index
            .append_speaker_transcript(meeting_uuid, &utterance)
            .await
        {
            log::warn!("speaker transcript write failed: {}", error);
        }

        let now = Instant::now();
        let signals = {
            let mut buffers = self.buffers.lock().await;
            buffers
                .entry(meeting_uuid.to_string())
                .or_insert_with(|| TranscriptBuffer::new(meeting_uuid.to_string(), now))
                .append(utterance, now)
        };
        self.process(signals).await;
    }

    /// Evaluates time-based triggers across all buffers
    pub async fn run_tick(&self, now: Instant) {
        let signals: Vec<BufferSignal> = {
            let mut buffers = self.buffers.lock().await;
            buffers
                .values_mut()
                .flat_map(|buffer| buffer.tick(now))
                .collect()
        };
        self.process(signals).await;
    }

    /// Flushes and removes a meeting's buffer; pending summaries and the
    /// terminal chunk are emitted before the channel closes.
    pub async fn destroy(&self, meeting_uuid: &str) {
        let signals = {
            let mut buffers = self.buffers.lock().await;
            match buffers.remove(meeting_uuid) {
                Some(mut buffer) => buffer.destroy(Instant::now()),
                None => return,
            }
        };
        self.process(signals).await;
        self.broadcaster.close_meeting(meeting_uuid);
    }

    /// Flushes every buffer; used on graceful shutdown
    pub async fn shutdown(&self) {
        let meetings: Vec<String> = self.buffers.lock().await.keys().cloned().collect();
        for meeting in meetings {
            self.destroy(&meeting).await;
        }
    }

    pub async fn buffer_count(&self) -> usize {
        self.buffers.lock().await.len()
    }

    async fn process(&self, signals: Vec<BufferSignal>) {
        for signal in signals {
            match signal {
                BufferSignal::Chunk(chunk) => {
                    log::debug!(
                        "Flushing chunk {} ({} speakers)",
                        chunk.chunk_id,
                        chunk.speaker_ids.len()
                    );
                    if let Err(error) = self.index.insert_chunk(&chunk).await {
                        log::warn!("chunk insert failed for {}: {}", chunk.chunk_id, error);
                    }
                    match serde_json::to_value(&chunk) {
                        Ok(mut event) => {
                            event["type"] = serde_json::Value::from("chunk");
                            self.broadcaster.publish(&chunk.meeting_id, event);
                        }
                        Err(error) => log::warn!("chunk serialization failed: {}", error),
                    }
                }
                BufferSignal::Summarize(signal) => {
                    let Some(summarizer) = &self.summarizer else {
                        continue;
                    };
                    let request = SummarizeRequest {
                        meeting_id: signal.meeting_id.clone(),
                        speaker_id: signal.speaker_id.clone(),
                        speaker_name: signal.speaker_name.clone(),
                        recent_text: signal.recent_text.clone(),
                        segment_count: signal.segment_count,
                    };
                    match summarizer.summarize(&request).await {
                        Ok(summary) => {
                            let context = SpeakerContext {
                                meeting_id: signal.meeting_id.clone(),
                                speaker_id: signal.speaker_id.clone(),
                                speaker_name: signal.speaker_name.clone(),
                                summary: summary.summary,
                                topics: summary.topics,
                                last_updated: chrono::Utc::now().timestamp_millis(),
                                segment_count: signal.segment_count,
                            };
                            if let Err(error) = self.index.upsert_speaker_context(&context).await {
                                log::warn!(
                                    "speaker context upsert failed for {}: {}",
                                    context.doc_id(),
                                    error
                                );
                            }
                            match serde_json::to_value(&context) {
                                Ok(mut event) => {
                                    event["type"] = serde_json::Value::from("speaker_context");
                                    self.broadcaster.publish(&signal.meeting_id, event);
                                }
                                Err(error) => {
                                    log::warn!("context serialization failed: {}", error)
                                }
                            }
                        }
                        Err(error) => {
                            log::warn!(
                                "summarisation failed for {}-{}: {}",
                                signal.meeting_id,
                                signal.speaker_id,
                                error
                            );
                        }
                    }
                }
            }
        }
    }
}
