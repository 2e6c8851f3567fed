//! Message codec for the signaling/media JSON wire format.
//!
//! Every frame is a JSON object tagged by an integer `msg_type`. Outbound
//! frames are built from typed structs; inbound frames are parsed into
//! [`ServerMessage`]. Binary payloads travel base64-encoded in
//! `content.data`.

use crate::domain::models::{MediaKind, MediaParams};
use crate::error::{AppError, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Integer message tags
pub mod msg_type {
    pub const SIGNALING_HANDSHAKE_REQ: u8 = 1;
    pub const SIGNALING_HANDSHAKE_RESP: u8 = 2;
    pub const MEDIA_HANDSHAKE_REQ: u8 = 3;
    pub const MEDIA_HANDSHAKE_RESP: u8 = 4;
    pub const EVENT_SUBSCRIPTION: u8 = 5;
    pub const SIGNALING_EVENT: u8 = 6;
    pub const MEDIA_READY: u8 = 7;
    pub const STREAM_STATE_CHANGED: u8 = 8;
    pub const SESSION_STATE_CHANGED: u8 = 9;
    pub const KEEP_ALIVE_REQ: u8 = 12;
    pub const KEEP_ALIVE_RESP: u8 = 13;
    pub const MEDIA_AUDIO: u8 = 14;
    pub const MEDIA_VIDEO: u8 = 15;
    pub const MEDIA_SHARE: u8 = 16;
    pub const MEDIA_TRANSCRIPT: u8 = 17;
    pub const MEDIA_CHAT: u8 = 18;
}

/// Signaling event types used for subscriptions and inbound events
pub mod event_type {
    pub const ACTIVE_SPEAKER_CHANGE: u32 = 1;
    pub const PARTICIPANT_JOIN: u32 = 2;
    pub const PARTICIPANT_LEAVE: u32 = 3;
    pub const SHARING_START: u32 = 4;
    pub const SHARING_STOP: u32 = 5;
}

/// Stream states carried in `msg_type=8`
pub mod stream_state {
    pub const INACTIVE: u32 = 0;
    pub const ACTIVE: u32 = 1;
    pub const INTERRUPTED: u32 = 2;
    pub const PAUSED: u32 = 3;
    pub const TERMINATED: u32 = 4;
}

/// Stop reasons carried alongside stream/session state changes
pub mod stop_reason {
    pub const UNKNOWN: u32 = 0;
    pub const HOST_TRIGGERED: u32 = 1;
    pub const USER_TRIGGERED: u32 = 2;
    pub const APP_DISABLED: u32 = 3;
    pub const CONNECTION_TIMEOUT: u32 = 4;
    pub const EXCEEDED_DURATION: u32 = 5;
    pub const MEETING_ENDED: u32 = 6;
}

/// Wire view of negotiated media parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaParamsWire {
    pub audio: AudioParamsWire,
    pub video: VideoParamsWire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParamsWire {
    pub sample_rate: u32,
    pub send_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoParamsWire {
    pub fps: u32,
}

impl From<MediaParams> for MediaParamsWire {
    fn from(params: MediaParams) -> Self {
        Self {
            audio: AudioParamsWire {
                sample_rate: params.audio_sample_rate.to_wire(),
                send_rate: params.audio_send_rate_ms,
            },
            video: VideoParamsWire {
                fps: params.video_fps,
            },
        }
    }
}

impl MediaParamsWire {
    pub fn to_params(&self) -> MediaParams {
        MediaParams {
            audio_sample_rate: crate::domain::models::AudioSampleRate::from_wire(
                self.audio.sample_rate,
            ),
            audio_send_rate_ms: self.audio.send_rate,
            video_fps: self.video.fps,
        }
    }
}

// ===== Outbound frames =====

#[derive(Debug, Serialize)]
pub struct SignalingHandshakeRequest {
    pub msg_type: u8,
    pub protocol_version: u8,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub signature: String,
    /// Requested media subscription mask
    pub media_type: u32,
    pub media_params: MediaParamsWire,
}

impl SignalingHandshakeRequest {
    pub fn new(
        meeting_uuid: &str,
        stream_id: &str,
        signature: &str,
        media_mask: u32,
        params: MediaParams,
    ) -> Self {
        Self {
            msg_type: msg_type::SIGNALING_HANDSHAKE_REQ,
            protocol_version: 1,
            meeting_uuid: meeting_uuid.to_string(),
            rtms_stream_id: stream_id.to_string(),
            signature: signature.to_string(),
            media_type: media_mask,
            media_params: params.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MediaHandshakeRequest {
    pub msg_type: u8,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub signature: String,
    /// Single media type flag for this sub-socket
    pub media_type: u32,
    pub media_params: MediaParamsWire,
}

impl MediaHandshakeRequest {
    pub fn new(
        meeting_uuid: &str,
        stream_id: &str,
        signature: &str,
        kind: MediaKind,
        params: MediaParams,
    ) -> Self {
        Self {
            msg_type: msg_type::MEDIA_HANDSHAKE_REQ,
            meeting_uuid: meeting_uuid.to_string(),
            rtms_stream_id: stream_id.to_string(),
            signature: signature.to_string(),
            media_type: kind.flag(),
            media_params: params.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventSubscription {
    pub msg_type: u8,
    pub events: Vec<u32>,
}

impl EventSubscription {
    pub fn new(events: Vec<u32>) -> Self {
        Self {
            msg_type: msg_type::EVENT_SUBSCRIPTION,
            events,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MediaReadyNotification {
    pub msg_type: u8,
    pub rtms_stream_id: String,
    pub media_type: u32,
}

impl MediaReadyNotification {
    pub fn new(stream_id: &str, kind: MediaKind) -> Self {
        Self {
            msg_type: msg_type::MEDIA_READY,
            rtms_stream_id: stream_id.to_string(),
            media_type: kind.flag(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeepAliveResponse {
    pub msg_type: u8,
    pub timestamp: i64,
}

impl KeepAliveResponse {
    /// Echoes the server's keep-alive timestamp
    pub fn new(timestamp: i64) -> Self {
        Self {
            msg_type: msg_type::KEEP_ALIVE_RESP,
            timestamp,
        }
    }
}

// ===== Inbound frames =====

/// Decoded media payload common to audio/video/share/transcript/chat
#[derive(Debug, Clone, PartialEq)]
pub struct MediaContent {
    pub user_id: i64,
    pub user_name: String,
    pub timestamp: i64,
    /// Decoded binary payload; `None` for text-only frames
    pub data: Option<Vec<u8>>,
    /// UTF-8 payload for transcript/chat frames
    pub text: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub language: Option<String>,
    pub attribute: Option<String>,
}

/// Typed view of one inbound frame
#[derive(Debug, Clone)]
pub enum ServerMessage {
    SignalingHandshakeResponse {
        status_code: i64,
        reason: Option<String>,
        /// Media type key → media server URL
        server_urls: HashMap<String, String>,
        media_params: Option<MediaParamsWire>,
    },
    MediaHandshakeResponse {
        status_code: i64,
        reason: Option<String>,
    },
    SignalingEvent {
        event_type: u32,
        data: Value,
    },
    StreamStateChanged {
        state: u32,
        reason: u32,
        timestamp: Option<i64>,
    },
    SessionStateChanged {
        state: u32,
        stop_reason: Option<u32>,
        timestamp: Option<i64>,
    },
    KeepAliveRequest {
        timestamp: i64,
    },
    Media {
        kind: MediaKind,
        content: MediaContent,
    },
}

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    user_id: i64,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    timestamp: i64,
    data: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    language: Option<String>,
    attribute: Option<String>,
}

impl ServerMessage {
    /// Parses one wire frame.
    ///
    /// Errors here mean the frame is dropped by the caller with a warning;
    /// they never terminate the session.
    pub fn parse(raw: &str) -> Result<ServerMessage> {
        let value: Value = serde_json::from_str(raw)?;
        let tag = value
            .get("msg_type")
            .and_then(Value::as_u64)
            .ok_or_else(|| AppError::InvalidInput("frame missing msg_type".to_string()))?;

        match tag as u8 {
            msg_type::SIGNALING_HANDSHAKE_RESP => {
                let status_code = value
                    .get("status_code")
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);
                let reason = value
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let server_urls = value
                    .get("media_server")
                    .and_then(|m| m.get("server_urls"))
                    .and_then(Value::as_object)
                    .map(|map| {
                        map.iter()
                            .filter_map(|(k, v)| v.as_str().map(|url| (k.clone(), url.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                let media_params = value
                    .get("media_params")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                Ok(ServerMessage::SignalingHandshakeResponse {
                    status_code,
                    reason,
                    server_urls,
                    media_params,
                })
            }
            msg_type::MEDIA_HANDSHAKE_RESP => Ok(ServerMessage::MediaHandshakeResponse {
                status_code: value
                    .get("status_code")
                    .and_then(Value::as_i64)
                    .unwrap_or(-1),
                reason: value
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            msg_type::SIGNALING_EVENT => Ok(ServerMessage::SignalingEvent {
                event_type: value
                    .get("event")
                    .and_then(|e| e.get("event_type"))
                    .or_else(|| value.get("event_type"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                data: value.get("event").cloned().unwrap_or(Value::Null),
            }),
            msg_type::STREAM_STATE_CHANGED => Ok(ServerMessage::StreamStateChanged {
                state: value.get("state").and_then(Value::as_u64).unwrap_or(0) as u32,
                reason: value.get("reason").and_then(Value::as_u64).unwrap_or(0) as u32,
                timestamp: value.get("timestamp").and_then(Value::as_i64),
            }),
            msg_type::SESSION_STATE_CHANGED => Ok(ServerMessage::SessionStateChanged {
                state: value.get("state").and_then(Value::as_u64).unwrap_or(0) as u32,
                stop_reason: value
                    .get("stop_reason")
                    .and_then(Value::as_u64)
                    .map(|r| r as u32),
                timestamp: value.get("timestamp").and_then(Value::as_i64),
            }),
            msg_type::KEEP_ALIVE_REQ => Ok(ServerMessage::KeepAliveRequest {
                timestamp: value
                    .get("timestamp")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        AppError::InvalidInput("keep-alive missing timestamp".to_string())
                    })?,
            }),
            msg_type::MEDIA_AUDIO => Self::parse_media(MediaKind::Audio, &value, true),
            msg_type::MEDIA_VIDEO => Self::parse_media(MediaKind::Video, &value, true),
            msg_type::MEDIA_SHARE => Self::parse_media(MediaKind::ShareScreen, &value, true),
            msg_type::MEDIA_TRANSCRIPT => Self::parse_media(MediaKind::Transcript, &value, false),
            msg_type::MEDIA_CHAT => Self::parse_media(MediaKind::Chat, &value, false),
            other => Err(AppError::InvalidInput(format!(
                "unknown msg_type {}",
                other
            ))),
        }
    }

    fn parse_media(kind: MediaKind, value: &Value, binary: bool) -> Result<ServerMessage> {
        let raw: RawContent = serde_json::from_value(
            value
                .get("content")
                .cloned()
                .ok_or_else(|| AppError::InvalidInput("media frame missing content".to_string()))?,
        )?;

        let decoded = match &raw.data {
            Some(b64) => Some(BASE64_STANDARD.decode(b64).map_err(|e| {
                AppError::InvalidInput(format!("invalid base64 in content.data: {}", e))
            })?),
            None => None,
        };

        let (data, text) = if binary {
            (decoded, None)
        } else {
            // Transcript and chat frames carry UTF-8 text in content.data
            let text = decoded
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
            (None, text)
        };

        Ok(ServerMessage::Media {
            kind,
            content: MediaContent {
                user_id: raw.user_id,
                user_name: raw.user_name,
                timestamp: raw.timestamp,
                data,
                text,
                start_time: raw.start_time,
                end_time: raw.end_time,
                language: raw.language,
                attribute: raw.attribute,
            },
        })
    }
}

/// Serializes an outbound frame to wire text
pub fn to_text<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AudioSampleRate;

    #[test]
    fn test_parse_signaling_handshake_response() {
        let raw = r#"{
            "msg_type": 2,
            "status_code": 0,
            "media_server": {
                "server_urls": {
                    "audio": "wss://media.example/audio",
                    "transcript": "wss://media.example/transcript"
                }
            },
            "media_params": {"audio": {"sample_rate": 1, "send_rate": 20}, "video": {"fps": 25}}
        }"#;
        match ServerMessage::parse(raw).unwrap() {
            ServerMessage::SignalingHandshakeResponse {
                status_code,
                server_urls,
                media_params,
                ..
            } => {
                assert_eq!(status_code, 0);
                assert_eq!(server_urls.len(), 2);
                assert_eq!(
                    server_urls.get("audio").map(String::as_str),
                    Some("wss://media.example/audio")
                );
                let params = media_params.unwrap().to_params();
                assert_eq!(params.audio_sample_rate, AudioSampleRate::Sr16k);
                assert_eq!(params.audio_send_rate_ms, 20);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_audio_payload_decodes_base64() {
        let raw = format!(
            r#"{{"msg_type": 14, "content": {{"user_id": 7, "user_name": "Ada", "timestamp": 1000, "data": "{}"}}}}"#,
            BASE64_STANDARD.encode([1u8, 2, 3, 4])
        );
        match ServerMessage::parse(&raw).unwrap() {
            ServerMessage::Media { kind, content } => {
                assert_eq!(kind, MediaKind::Audio);
                assert_eq!(content.data, Some(vec![1, 2, 3, 4]));
                assert_eq!(content.text, None);
                assert_eq!(content.user_name, "Ada");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_transcript_payload_decodes_text() {
        let raw = format!(
            r#"{{"msg_type": 17, "content": {{"user_id": 7, "user_name": "Ada", "timestamp": 1000,
                "data": "{}", "start_time": 900, "end_time": 1100, "language": "en", "attribute": "final"}}}}"#,
            BASE64_STANDARD.encode("hello world")
        );
        match ServerMessage::parse(&raw).unwrap() {
            ServerMessage::Media { kind, content } => {
                assert_eq!(kind, MediaKind::Transcript);
                assert_eq!(content.text.as_deref(), Some("hello world"));
                assert_eq!(content.data, None);
                assert_eq!(content.start_time, Some(900));
                assert_eq!(content.end_time, Some(1100));
                assert_eq!(content.language.as_deref(), Some("en"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_keep_alive() {
        let raw = r#"{"msg_type": 12, "timestamp": 1234567}"#;
        match ServerMessage::parse(raw).unwrap() {
            ServerMessage::KeepAliveRequest { timestamp } => assert_eq!(timestamp, 1234567),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_keep_alive_response_echoes_timestamp() {
        let response = KeepAliveResponse::new(1234567);
        let json: Value = serde_json::from_str(&to_text(&response).unwrap()).unwrap();
        assert_eq!(json["msg_type"], 13);
        assert_eq!(json["timestamp"], 1234567);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(ServerMessage::parse("not json").is_err());
        assert!(ServerMessage::parse(r#"{"no_tag": true}"#).is_err());
        assert!(ServerMessage::parse(r#"{"msg_type": 99}"#).is_err());
        // Invalid base64 drops the packet rather than crashing
        assert!(
            ServerMessage::parse(r#"{"msg_type": 14, "content": {"data": "%%%"}}"#).is_err()
        );
    }

    #[test]
    fn test_stream_state_changed() {
        let raw = r#"{"msg_type": 8, "state": 4, "reason": 6, "timestamp": 42}"#;
        match ServerMessage::parse(raw).unwrap() {
            ServerMessage::StreamStateChanged {
                state,
                reason,
                timestamp,
            } => {
                assert_eq!(state, stream_state::TERMINATED);
                assert_eq!(reason, stop_reason::MEETING_ENDED);
                assert_eq!(timestamp, Some(42));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_signaling_handshake_request_shape() {
        let request = SignalingHandshakeRequest::new(
            "uuid-1",
            "stream-1",
            "sig",
            9,
            MediaParams::default(),
        );
        let json: Value = serde_json::from_str(&to_text(&request).unwrap()).unwrap();
        assert_eq!(json["msg_type"], 1);
        assert_eq!(json["media_type"], 9);
        assert_eq!(json["rtms_stream_id"], "stream-1");
        assert_eq!(json["media_params"]["audio"]["send_rate"], 20);
    }
}
