//! Per-meeting transcript accumulator.
//!
//! Holds utterances in arrival order and turns them into two kinds of
//! signals: content chunks for the index and per-speaker summarisation
//! triggers. The core is synchronous and clock-injected; a driver task
//! calls `tick` once a second and routes the signals to the adapters.
//!
//! Triggers:
//! - periodic summarisation every 30s for speakers with new utterances
//! - per-speaker idle summarisation after 10s of silence
//! - chunk flush on whichever comes first of 60s, 500 accumulated words,
//!   or buffer destruction

use crate::domain::models::{ContentChunk, Utterance};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);
pub const SPEAKER_IDLE: Duration = Duration::from_secs(10);
pub const CHUNK_INTERVAL: Duration = Duration::from_secs(60);
pub const CHUNK_WORD_THRESHOLD: usize = 500;

/// Payload for one summarisation trigger
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeSignal {
    pub meeting_id: String,
    pub speaker_id: String,
    pub speaker_name: String,
    /// The speaker's unsummarised utterances joined with single spaces
    pub recent_text: String,
    /// Cumulative utterance count for this speaker
    pub segment_count: u64,
}

/// Output of the buffer's trigger evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum BufferSignal {
    Chunk(ContentChunk),
    Summarize(SummarizeSignal),
}

struct SpeakerMark {
    name: String,
    /// Index into `utterances` up to which this speaker is summarised
    mark: usize,
    segment_count: u64,
    last_append: Instant,
}

/// Ordered utterance buffer with summarisation and chunking triggers
pub struct TranscriptBuffer {
    meeting_uuid: String,
    utterances: Vec<Utterance>,
    word_count: usize,
    chunk_seq: u64,
    speakers: HashMap<String, SpeakerMark>,
    last_summary_sweep: Instant,
    last_chunk_flush: Instant,
}

impl TranscriptBuffer {
    pub fn new(meeting_uuid: String, now: Instant) -> Self {
        Self {
            meeting_uuid,
            utterances: Vec::new(),
            word_count: 0,
            chunk_seq: 0,
            speakers: HashMap::new(),
            last_summary_sweep: now,
            last_chunk_flush: now,
        }
    }

    pub fn meeting_uuid(&self) -> &str {
        &self.meeting_uuid
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Appends one utterance; may flush a chunk when the word threshold is
    /// crossed.
    pub fn append(&mut self, utterance: Utterance, now: Instant) -> Vec<BufferSignal> {
        self.word_count += utterance.text.split_whitespace().count();

        let mark = self
            .speakers
            .entry(utterance.speaker_id.clone())
            .or_insert_with(|| SpeakerMark {
                name: utterance.speaker_name.clone(),
                mark: 0,
                segment_count: 0,
                last_append: now,
            });
        mark.name = utterance.speaker_name.clone();
        mark.last_append = now;

        self.utterances.push(utterance);

        let mut signals = Vec::new();
        if self.word_count >= CHUNK_WORD_THRESHOLD {
            if let Some(chunk) = self.flush_chunk(now) {
                signals.push(BufferSignal::Chunk(chunk));
            }
        }
        signals
    }

    /// Evaluates the time-based triggers; call roughly once a second
    pub fn tick(&mut self, now: Instant) -> Vec<BufferSignal> {
        let mut signals = Vec::new();

        // Speaker-idle summarisation
        let idle: Vec<String> = self
            .speakers
            .iter()
            .filter(|(id, mark)| {
                now.duration_since(mark.last_append) >= SPEAKER_IDLE
                    && self.has_pending(id, mark.mark)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for speaker_id in idle {
            if let Some(signal) = self.summarize_speaker(&speaker_id) {
                signals.push(BufferSignal::Summarize(signal));
            }
        }

        // Periodic summarisation sweep
        if now.duration_since(self.last_summary_sweep) >= SUMMARY_INTERVAL {
            self.last_summary_sweep = now;
            let pending: Vec<String> = self
                .speakers
                .iter()
                .filter(|(id, mark)| self.has_pending(id, mark.mark))
                .map(|(id, _)| id.clone())
                .collect();
            for speaker_id in pending {
                if let Some(signal) = self.summarize_speaker(&speaker_id) {
                    signals.push(BufferSignal::Summarize(signal));
                }
            }
        }

        // Periodic chunk flush
        if now.duration_since(self.last_chunk_flush) >= CHUNK_INTERVAL {
            match self.flush_chunk(now) {
                Some(chunk) => signals.push(BufferSignal::Chunk(chunk)),
                // Nothing buffered; restart the window
                None => self.last_chunk_flush = now,
            }
        }

        signals
    }

    /// Flushes pending summaries and the final chunk.
    ///
    /// The buffer is unusable afterwards only by convention; the owner
    /// drops it.
    pub fn destroy(&mut self, now: Instant) -> Vec<BufferSignal> {
        let mut signals = Vec::new();
        let speaker_ids: Vec<String> = self.speakers.keys().cloned().collect();
        for speaker_id in speaker_ids {
            if let Some(signal) = self.summarize_speaker(&speaker_id) {
                signals.push(BufferSignal::Summarize(signal));
            }
        }
        if let Some(chunk) = self.flush_chunk(now) {
            signals.push(BufferSignal::Chunk(chunk));
        }
        signals
    }

    fn has_pending(&self, speaker_id: &str, mark: usize) -> bool {
        self.utterances[mark.min(self.utterances.len())..]
            .iter()
            .any(|u| u.speaker_id == speaker_id && !u.text.trim().is_empty())
    }

    /// Emits a summarisation trigger for one speaker and advances their mark
    fn summarize_speaker(&mut self, speaker_id: &str) -> Option<SummarizeSignal> {
        let mark = self.speakers.get_mut(speaker_id)?;
        let pending: Vec<&Utterance> = self.utterances[mark.mark.min(self.utterances.len())..]
            .iter()
            .filter(|u| u.speaker_id == speaker_id)
            .collect();

        let recent_text = pending
            .iter()
            .map(|u| u.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let count = pending.len() as u64;
        mark.mark = self.utterances.len();

        // Never fire with empty text
        if recent_text.is_empty() {
            return None;
        }
        mark.segment_count += count;

        Some(SummarizeSignal {
            meeting_id: self.meeting_uuid.clone(),
            speaker_id: speaker_id.to_string(),
            speaker_name: mark.name.clone(),
            recent_text,
            segment_count: mark.segment_count,
        })
    }

    /// Builds a chunk from everything buffered and resets the accumulator
    fn flush_chunk(&mut self, now: Instant) -> Option<ContentChunk> {
        if self.utterances.is_empty() {
            return None;
        }

        self.chunk_seq += 1;
        let text = self
            .utterances
            .iter()
            .map(|u| format!("{}: {}", u.speaker_name, u.text))
            .collect::<Vec<_>>()
            .join("\n");

        let mut speaker_ids = Vec::new();
        let mut speaker_names = Vec::new();
        for utterance in &self.utterances {
            if !speaker_ids.contains(&utterance.speaker_id) {
                speaker_ids.push(utterance.speaker_id.clone());
                speaker_names.push(utterance.speaker_name.clone());
            }
        }

        let chunk = ContentChunk {
            chunk_id: format!("{}-chunk-{}", self.meeting_uuid, self.chunk_seq),
            meeting_id: self.meeting_uuid.clone(),
            speaker_ids,
            speaker_names,
            text,
            start_time: self.utterances.first().map(|u| u.timestamp).unwrap_or(0),
            end_time: self.utterances.last().map(|u| u.timestamp).unwrap_or(0),
        };

        // The buffer is now empty; marks restart but cumulative segment
        // counts survive across chunks
        self.utterances.clear();
        self.word_count = 0;
        for mark in self.speakers.values_mut() {
            mark.mark = 0;
        }
        self.last_chunk_flush = now;

        Some(chunk)
    }
}
