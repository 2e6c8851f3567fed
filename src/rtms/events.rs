//! Typed events emitted by stream sessions.
//!
//! Consumers subscribe by variant, not by payload inheritance; every event
//! carries the identifying stream info.

use crate::domain::models::ProductKind;
use crate::rtms::errors::RtmsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity attached to every event a session emits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamInfo {
    pub meeting_uuid: String,
    pub stream_id: String,
    pub product: ProductKind,
}

/// One audio/video/share frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaFrame {
    pub info: StreamInfo,
    pub buffer: Vec<u8>,
    pub user_id: i64,
    pub user_name: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// One transcript segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptFrame {
    pub info: StreamInfo,
    pub user_id: i64,
    pub user_name: String,
    pub text: String,
    pub timestamp: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub language: Option<String>,
    pub attribute: Option<String>,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFrame {
    pub info: StreamInfo,
    pub user_id: i64,
    pub user_name: String,
    pub text: String,
    pub timestamp: i64,
}

/// Tagged event stream produced by a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Audio(MediaFrame),
    Video(MediaFrame),
    ShareScreen(MediaFrame),
    Transcript(TranscriptFrame),
    Chat(ChatFrame),
    /// Non-media signaling event (active speaker, join/leave, sharing)
    Event {
        info: StreamInfo,
        event_type: u32,
        data: Value,
    },
    StreamStateChanged {
        info: StreamInfo,
        state: u32,
        reason: u32,
    },
    SessionStateChanged {
        info: StreamInfo,
        state: u32,
        stop_reason: Option<u32>,
    },
    Error {
        info: StreamInfo,
        error: RtmsError,
    },
}

impl SessionEvent {
    pub fn info(&self) -> &StreamInfo {
        match self {
            SessionEvent::Audio(frame)
            | SessionEvent::Video(frame)
            | SessionEvent::ShareScreen(frame) => &frame.info,
            SessionEvent::Transcript(frame) => &frame.info,
            SessionEvent::Chat(frame) => &frame.info,
            SessionEvent::Event { info, .. }
            | SessionEvent::StreamStateChanged { info, .. }
            | SessionEvent::SessionStateChanged { info, .. }
            | SessionEvent::Error { info, .. } => info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> StreamInfo {
        StreamInfo {
            meeting_uuid: "UUID-A".to_string(),
            stream_id: "S1".to_string(),
            product: ProductKind::Meeting,
        }
    }

    #[test]
    fn test_event_tagging() {
        let event = SessionEvent::Chat(ChatFrame {
            info: info(),
            user_id: 1,
            user_name: "Ada".to_string(),
            text: "hi".to_string(),
            timestamp: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["info"]["stream_id"], "S1");
    }

    #[test]
    fn test_info_accessor() {
        let event = SessionEvent::StreamStateChanged {
            info: info(),
            state: 1,
            reason: 0,
        };
        assert_eq!(event.info().meeting_uuid, "UUID-A");
    }
}
