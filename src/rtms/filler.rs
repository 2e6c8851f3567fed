//! Jitter/gap fillers for audio and video.
//!
//! Both media types share one paced-buffer core: packets are buffered
//! ordered by timestamp and a periodic tick emits exactly one frame,
//! either the next real packet or a synthesised filler (silence for
//! audio, the last key frame for video). The core is synchronous; the
//! owning media task drives it from a `tokio::time::interval` at the
//! frame duration.

use crate::domain::models::{MediaKind, MediaParams};
use crate::rtms::events::{MediaFrame, StreamInfo};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Emission threshold: a packet within this many frames of the expected
/// timestamp is played as-is.
const EMIT_WINDOW_FRAMES: i64 = 3;
/// A packet lagging more than this many frames forces a re-sync instead of
/// being dropped.
const RESYNC_LAG_FRAMES: i64 = 10;

const FILLER_LOG_INTERVAL: Duration = Duration::from_secs(1);
const REAL_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Pacing configuration for one filler instance
#[derive(Debug, Clone)]
pub struct FillerConfig {
    pub kind: MediaKind,
    /// Milliseconds between output frames
    pub frame_duration_ms: i64,
    /// Initial synthetic payload (silence / black frame)
    pub filler_payload: Vec<u8>,
    /// Replace the synthetic payload with each real frame (video repeats
    /// its last key frame; audio keeps silence)
    pub repeat_last_frame: bool,
}

impl FillerConfig {
    /// Audio filler paced at the negotiated send rate, emitting PCM16 silence
    pub fn audio(params: &MediaParams) -> Self {
        let samples_per_frame =
            params.audio_sample_rate.hz() as usize * params.audio_send_rate_ms as usize / 1000;
        Self {
            kind: MediaKind::Audio,
            frame_duration_ms: params.audio_send_rate_ms as i64,
            filler_payload: vec![0u8; samples_per_frame * 2],
            repeat_last_frame: false,
        }
    }

    /// Video filler paced at the negotiated frame rate
    pub fn video(params: &MediaParams) -> Self {
        Self {
            kind: MediaKind::Video,
            frame_duration_ms: (1000 / params.video_fps.max(1)) as i64,
            filler_payload: Vec::new(),
            repeat_last_frame: true,
        }
    }
}

/// One tick's output
#[derive(Debug, Clone, PartialEq)]
pub enum FillerOutput {
    Real(MediaFrame),
    Filler(MediaFrame),
}

impl FillerOutput {
    pub fn into_frame(self) -> MediaFrame {
        match self {
            FillerOutput::Real(frame) | FillerOutput::Filler(frame) => frame,
        }
    }
}

/// Paced emitter that smooths arrival jitter and injects synthetic frames
/// across gaps.
pub struct JitterFiller {
    config: FillerConfig,
    info: StreamInfo,
    /// Ordered by timestamp; insertion fast-paths the append case
    buffer: VecDeque<MediaFrame>,
    /// Timestamp the next tick should emit; `None` until the first packet
    expected: Option<i64>,
    /// Largest packet timestamp seen, used for terminal gap filling
    latest_ts: Option<i64>,
    filler_payload: Vec<u8>,
    last_user: Option<(i64, String)>,
    last_filler_log: Option<Instant>,
    last_real_log: Option<Instant>,
}

impl JitterFiller {
    pub fn new(config: FillerConfig, info: StreamInfo) -> Self {
        let filler_payload = config.filler_payload.clone();
        Self {
            config,
            info,
            buffer: VecDeque::new(),
            expected: None,
            latest_ts: None,
            filler_payload,
            last_user: None,
            last_filler_log: None,
            last_real_log: None,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.config.frame_duration_ms as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Inserts a packet ordered by timestamp
    pub fn push(&mut self, frame: MediaFrame) {
        self.latest_ts = Some(self.latest_ts.map_or(frame.timestamp, |t| t.max(frame.timestamp)));
        self.last_user = Some((frame.user_id, frame.user_name.clone()));

        match self.buffer.back() {
            Some(last) if frame.timestamp < last.timestamp => {
                let position = self
                    .buffer
                    .partition_point(|f| f.timestamp <= frame.timestamp);
                self.buffer.insert(position, frame);
            }
            _ => self.buffer.push_back(frame),
        }
    }

    /// Produces one output frame for this tick, or `None` before the first
    /// packet has arrived.
    pub fn tick(&mut self) -> Option<FillerOutput> {
        let frame_ms = self.config.frame_duration_ms;
        loop {
            let Some(head_ts) = self.buffer.front().map(|f| f.timestamp) else {
                // Empty buffer mid-stream is a gap
                let expected = self.expected?;
                return Some(self.emit_filler(expected));
            };

            // First tick locks expected onto the first packet, so a stream
            // starting late produces no leading fillers
            let expected = *self.expected.get_or_insert(head_ts);
            let diff = head_ts - expected;

            if diff.abs() < EMIT_WINDOW_FRAMES * frame_ms {
                return Some(self.emit_real(expected));
            }
            if diff < -RESYNC_LAG_FRAMES * frame_ms {
                // Large lag: jump to the packet rather than discarding a
                // whole run of audio
                log::warn!(
                    "{} filler re-syncing: packet {}ms behind expected",
                    self.config.kind,
                    -diff
                );
                return Some(self.emit_real(expected));
            }
            if diff < 0 {
                // Small lag: stale packet
                self.buffer.pop_front();
                continue;
            }
            return Some(self.emit_filler(expected));
        }
    }

    /// Terminal drain: emits everything still buffered and fills up to
    /// `end_time` (or the last seen packet timestamp) with synthetic frames.
    pub fn finish(&mut self, end_time: Option<i64>) -> Vec<FillerOutput> {
        let mut outputs = Vec::new();
        let Some(target) = end_time.or(self.latest_ts) else {
            return outputs;
        };

        while !self.buffer.is_empty() || self.expected.map_or(false, |e| e < target) {
            match self.tick() {
                Some(output) => outputs.push(output),
                None => break,
            }
        }
        outputs
    }

    fn emit_real(&mut self, expected: i64) -> FillerOutput {
        let frame = self.buffer.pop_front().expect("checked non-empty");
        self.expected = Some(frame.timestamp + self.config.frame_duration_ms);
        if self.config.repeat_last_frame {
            self.filler_payload = frame.buffer.clone();
        }
        if self
            .last_real_log
            .map_or(true, |t| t.elapsed() >= REAL_LOG_INTERVAL)
        {
            log::debug!(
                "{} filler emitting real frame at {} (expected {})",
                self.config.kind,
                frame.timestamp,
                expected
            );
            self.last_real_log = Some(Instant::now());
        }
        FillerOutput::Real(frame)
    }

    fn emit_filler(&mut self, expected: i64) -> FillerOutput {
        self.expected = Some(expected + self.config.frame_duration_ms);
        let (user_id, user_name) = self.last_user.clone().unwrap_or((0, String::new()));
        if self
            .last_filler_log
            .map_or(true, |t| t.elapsed() >= FILLER_LOG_INTERVAL)
        {
            log::debug!(
                "{} filler injecting synthetic frame at {}",
                self.config.kind,
                expected
            );
            self.last_filler_log = Some(Instant::now());
        }
        FillerOutput::Filler(MediaFrame {
            info: self.info.clone(),
            buffer: self.filler_payload.clone(),
            user_id,
            user_name,
            timestamp: expected,
        })
    }
}
