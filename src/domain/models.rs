/// Domain models for RTMS Scribe
///
/// These models represent core business entities and are transport-agnostic.
use serde::{Deserialize, Serialize};

/// Product surface a stream belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProductKind {
    Meeting,
    Webinar,
    VideoSdk,
    ContactCenter,
    Phone,
}

impl ProductKind {
    /// Maps a webhook event prefix (`<prefix>.rtms_started`) to a product.
    ///
    /// Video SDK events arrive with the `session` prefix.
    pub fn from_event_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "meeting" => Some(ProductKind::Meeting),
            "webinar" => Some(ProductKind::Webinar),
            "session" => Some(ProductKind::VideoSdk),
            "contactcenter" => Some(ProductKind::ContactCenter),
            "phone" => Some(ProductKind::Phone),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductKind::Meeting => write!(f, "meeting"),
            ProductKind::Webinar => write!(f, "webinar"),
            ProductKind::VideoSdk => write!(f, "videoSdk"),
            ProductKind::ContactCenter => write!(f, "contactCenter"),
            ProductKind::Phone => write!(f, "phone"),
        }
    }
}

/// A single subscribable media type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    ShareScreen,
    Transcript,
    Chat,
}

impl MediaKind {
    pub const ALL: [MediaKind; 5] = [
        MediaKind::Audio,
        MediaKind::Video,
        MediaKind::ShareScreen,
        MediaKind::Transcript,
        MediaKind::Chat,
    ];

    /// Bit flag used in subscription masks and wire handshakes
    pub fn flag(self) -> u32 {
        match self {
            MediaKind::Audio => 1,
            MediaKind::Video => 2,
            MediaKind::ShareScreen => 4,
            MediaKind::Transcript => 8,
            MediaKind::Chat => 16,
        }
    }

    pub fn from_flag(flag: u32) -> Option<Self> {
        MediaKind::ALL.iter().copied().find(|k| k.flag() == flag)
    }

    /// Key used for this media type in handshake `server_urls` maps
    pub fn url_key(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::ShareScreen => "sharescreen",
            MediaKind::Transcript => "transcript",
            MediaKind::Chat => "chat",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url_key())
    }
}

/// Sentinel mask value meaning "everything the server offers"
pub const MEDIA_MASK_ALL: u32 = 32;

/// Bit mask over subscribed media types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MediaMask(pub u32);

impl MediaMask {
    pub fn contains(self, kind: MediaKind) -> bool {
        self.0 & kind.flag() != 0
    }

    pub fn is_all(self) -> bool {
        self.0 & MEDIA_MASK_ALL != 0
    }

    /// Media types present in this mask, in flag order
    pub fn kinds(self) -> Vec<MediaKind> {
        MediaKind::ALL
            .iter()
            .copied()
            .filter(|k| self.contains(*k))
            .collect()
    }

    pub fn count(self) -> u32 {
        (self.0 & 0x1f).count_ones()
    }

    /// Resolves the set of media sub-sockets to open.
    ///
    /// `all` subscribes to whatever the server advertises; otherwise the
    /// effective set is the intersection of requested and available.
    pub fn effective(self, available: MediaMask) -> MediaMask {
        if self.is_all() {
            MediaMask(available.0 & 0x1f)
        } else {
            MediaMask(self.0 & available.0 & 0x1f)
        }
    }
}

/// Negotiated audio sample rate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AudioSampleRate {
    Sr8k,
    Sr16k,
    Sr32k,
    Sr48k,
}

impl AudioSampleRate {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => AudioSampleRate::Sr8k,
            1 => AudioSampleRate::Sr16k,
            2 => AudioSampleRate::Sr32k,
            _ => AudioSampleRate::Sr48k,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            AudioSampleRate::Sr8k => 0,
            AudioSampleRate::Sr16k => 1,
            AudioSampleRate::Sr32k => 2,
            AudioSampleRate::Sr48k => 3,
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            AudioSampleRate::Sr8k => 8_000,
            AudioSampleRate::Sr16k => 16_000,
            AudioSampleRate::Sr32k => 32_000,
            AudioSampleRate::Sr48k => 48_000,
        }
    }
}

/// Per-stream negotiated media parameters.
///
/// Fixed at the first signaling handshake response and immutable for the
/// lifetime of the stream; the fillers pace themselves from these values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MediaParams {
    pub audio_sample_rate: AudioSampleRate,
    /// Milliseconds of audio per frame
    pub audio_send_rate_ms: u32,
    pub video_fps: u32,
}

impl Default for MediaParams {
    fn default() -> Self {
        Self {
            audio_sample_rate: AudioSampleRate::Sr16k,
            audio_send_rate_ms: 20,
            video_fps: 25,
        }
    }
}

/// A single transcript utterance, held only until the next chunk flush
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker_id: String,
    pub speaker_name: String,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// A buffered run of utterances flushed to the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    /// `<meetingUuid>-chunk-<seq>`, monotonic per meeting
    pub chunk_id: String,
    pub meeting_id: String,
    pub speaker_ids: Vec<String>,
    pub speaker_names: Vec<String>,
    pub text: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Evolving per-speaker summary maintained by the summariser adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerContext {
    pub meeting_id: String,
    pub speaker_id: String,
    pub speaker_name: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub last_updated: i64,
    pub segment_count: u64,
}

impl SpeakerContext {
    /// Document id in the `speaker_context` collection
    pub fn doc_id(&self) -> String {
        format!("{}-{}", self.meeting_id, self.speaker_id)
    }
}

/// Bidirectional meeting identity mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingMapping {
    pub meeting_id: i64,
    pub uuid: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub status: String,
}

impl MeetingMapping {
    pub fn started(meeting_id: i64, uuid: String) -> Self {
        Self {
            meeting_id,
            uuid,
            start_time: Some(chrono::Utc::now().timestamp_millis()),
            end_time: None,
            status: "active".to_string(),
        }
    }
}

/// Lifecycle state of a socket (signaling or media sub-socket)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SocketState {
    Idle,
    Connecting,
    Authenticated,
    Streaming,
    Closed,
    Error,
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketState::Idle => write!(f, "idle"),
            SocketState::Connecting => write!(f, "connecting"),
            SocketState::Authenticated => write!(f, "authenticated"),
            SocketState::Streaming => write!(f, "streaming"),
            SocketState::Closed => write!(f, "closed"),
            SocketState::Error => write!(f, "error"),
        }
    }
}

/// Observable per-stream record, kept current while the session is live
/// and snapshotted into history on removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub stream_id: String,
    pub meeting_uuid: String,
    pub product: ProductKind,
    /// Signaling socket state
    pub state: SocketState,
    /// Per-media-sub-socket states
    pub media_states: std::collections::HashMap<MediaKind, SocketState>,
    pub media_mask: MediaMask,
    pub media_params: MediaParams,
    pub first_packet_ts: Option<i64>,
    pub last_packet_ts: Option<i64>,
    pub rtt_ms: Option<u64>,
    pub last_keep_alive: Option<i64>,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

impl StreamMetadata {
    pub fn new(stream_id: String, meeting_uuid: String, product: ProductKind) -> Self {
        Self {
            stream_id,
            meeting_uuid,
            product,
            state: SocketState::Idle,
            media_states: std::collections::HashMap::new(),
            media_mask: MediaMask::default(),
            media_params: MediaParams::default(),
            first_packet_ts: None,
            last_packet_ts: None,
            rtt_ms: None,
            last_keep_alive: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            closed_at: None,
        }
    }

    /// Records a media packet timestamp; packets may arrive out of order
    /// across sub-sockets, so the bounds are min/max rather than
    /// first/last arrival.
    pub fn observe_packet(&mut self, timestamp: i64) {
        self.first_packet_ts = Some(self.first_packet_ts.map_or(timestamp, |t| t.min(timestamp)));
        self.last_packet_ts = Some(self.last_packet_ts.map_or(timestamp, |t| t.max(timestamp)));
    }
}

/// Per-product OAuth credential record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub secret_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_from_event_prefix() {
        assert_eq!(
            ProductKind::from_event_prefix("meeting"),
            Some(ProductKind::Meeting)
        );
        assert_eq!(
            ProductKind::from_event_prefix("session"),
            Some(ProductKind::VideoSdk)
        );
        assert_eq!(ProductKind::from_event_prefix("endpoint"), None);
    }

    #[test]
    fn test_effective_mask_intersection() {
        let requested = MediaMask(1 | 8 | 16); // audio | transcript | chat
        let available = MediaMask(1 | 8); // audio | transcript
        let effective = requested.effective(available);
        assert_eq!(effective, MediaMask(1 | 8));
        assert_eq!(effective.count(), 2);
    }

    #[test]
    fn test_effective_mask_all_takes_available() {
        let requested = MediaMask(MEDIA_MASK_ALL);
        let available = MediaMask(1 | 8);
        assert_eq!(requested.effective(available), MediaMask(1 | 8));

        let available = MediaMask(1 | 2);
        assert_eq!(requested.effective(available), MediaMask(3));
    }

    #[test]
    fn test_mask_kinds_in_flag_order() {
        let mask = MediaMask(1 | 4 | 8);
        assert_eq!(
            mask.kinds(),
            vec![MediaKind::Audio, MediaKind::ShareScreen, MediaKind::Transcript]
        );
    }

    #[test]
    fn test_sample_rate_mapping() {
        assert_eq!(AudioSampleRate::from_wire(1).hz(), 16_000);
        assert_eq!(AudioSampleRate::from_wire(3).hz(), 48_000);
        // Unknown values clamp to the highest rate
        assert_eq!(AudioSampleRate::from_wire(9).hz(), 48_000);
    }

    #[test]
    fn test_speaker_context_doc_id() {
        let ctx = SpeakerContext {
            meeting_id: "UUID-A".to_string(),
            speaker_id: "U1".to_string(),
            speaker_name: "Ada".to_string(),
            summary: String::new(),
            topics: vec![],
            last_updated: 0,
            segment_count: 0,
        };
        assert_eq!(ctx.doc_id(), "UUID-A-U1");
    }
}
