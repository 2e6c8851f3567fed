//! Per-stream session state machine.
//!
//! Each stream runs as a single task owning its signaling socket and the
//! lifecycle of one media sub-socket task per subscribed media type. All
//! session state mutates inside this task; other components interact
//! through the command channel on the handle.

use crate::domain::models::{
    Credentials, MediaKind, MediaMask, MediaParams, ProductKind, SocketState, StreamMetadata,
};
use crate::rtms::errors::RtmsError;
use crate::rtms::events::{SessionEvent, StreamInfo};
use crate::rtms::media::{self, MediaSocketContext};
use crate::rtms::registry::ConnectionRegistry;
use crate::wire::envelope::{
    self, stop_reason, stream_state, EventSubscription, KeepAliveResponse,
    SignalingHandshakeRequest, ServerMessage,
};
use crate::wire::envelope::event_type;
use crate::wire::signature;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Reconnect debounce shared by signaling and media sub-sockets
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Commands a session accepts from the router and its media tasks
#[derive(Debug)]
pub enum SessionCommand {
    /// Stop the session and all media sockets
    Stop,
    /// Media sub-socket completed its handshake
    MediaReady { kind: MediaKind },
    /// Media sub-socket closed; stale generations are ignored
    MediaClosed { kind: MediaKind, generation: u64 },
    /// Debounced request to re-open one media sub-socket
    MediaReconnect { kind: MediaKind, generation: u64 },
    /// Media sub-socket hit a non-retryable handshake failure
    MediaFatal { kind: MediaKind, error: RtmsError },
}

/// Static description of the stream being ingested
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stream_id: String,
    pub meeting_uuid: String,
    /// Signaling server URL from the lifecycle webhook
    pub server_url: String,
    pub product: ProductKind,
    pub credentials: Credentials,
    pub media_mask: MediaMask,
    pub enable_fillers: bool,
}

/// Cheap cloneable reference to a live session
#[derive(Clone)]
pub struct SessionHandle {
    stream_id: Arc<String>,
    meeting_uuid: Arc<String>,
    product: ProductKind,
    cmd_tx: Option<mpsc::UnboundedSender<SessionCommand>>,
    metadata: Arc<Mutex<StreamMetadata>>,
}

impl SessionHandle {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn meeting_uuid(&self) -> &str {
        &self.meeting_uuid
    }

    pub fn product(&self) -> ProductKind {
        self.product
    }

    /// Requests an orderly stop; safe to call after the task has exited
    pub fn stop(&self) {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(SessionCommand::Stop);
        }
    }

    pub fn metadata(&self) -> StreamMetadata {
        self.metadata.lock().unwrap().clone()
    }

    pub fn observe_packet(&self, timestamp: i64) {
        self.metadata.lock().unwrap().observe_packet(timestamp);
    }

    /// Handle without a backing task, for registry bookkeeping in tests
    pub fn detached(stream_id: String, meeting_uuid: String, product: ProductKind) -> Self {
        let metadata = StreamMetadata::new(stream_id.clone(), meeting_uuid.clone(), product);
        Self {
            stream_id: Arc::new(stream_id),
            meeting_uuid: Arc::new(meeting_uuid),
            product,
            cmd_tx: None,
            metadata: Arc::new(Mutex::new(metadata)),
        }
    }
}

/// Spawns the session task and returns its handle.
///
/// The task removes itself from the registry on exit, which archives its
/// terminal stats into the history ring.
pub fn spawn(
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    registry: Arc<ConnectionRegistry>,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let metadata = Arc::new(Mutex::new(StreamMetadata::new(
        config.stream_id.clone(),
        config.meeting_uuid.clone(),
        config.product,
    )));

    let handle = SessionHandle {
        stream_id: Arc::new(config.stream_id.clone()),
        meeting_uuid: Arc::new(config.meeting_uuid.clone()),
        product: config.product,
        cmd_tx: Some(cmd_tx.clone()),
        metadata: Arc::clone(&metadata),
    };

    let session = Session {
        info: StreamInfo {
            meeting_uuid: config.meeting_uuid.clone(),
            stream_id: config.stream_id.clone(),
            product: config.product,
        },
        config,
        metadata,
        events,
        cmd_tx,
        registry,
        retryable: true,
        stopping: false,
        generation: 0,
        handshake_in_flight: false,
        media_params: MediaParams::default(),
        media_urls: HashMap::new(),
        media_tasks: HashMap::new(),
    };
    tokio::spawn(session.run(cmd_rx));

    handle
}

/// Derives the server-available media mask from the handshake's URL map
pub fn available_mask(server_urls: &HashMap<String, String>) -> MediaMask {
    let mut mask = 0;
    for kind in MediaKind::ALL {
        if server_urls.contains_key(kind.url_key()) {
            mask |= kind.flag();
        }
    }
    MediaMask(mask)
}

enum Outcome {
    Stop,
    Reconnect,
    Fatal,
}

struct Session {
    config: SessionConfig,
    info: StreamInfo,
    metadata: Arc<Mutex<StreamMetadata>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    registry: Arc<ConnectionRegistry>,
    retryable: bool,
    stopping: bool,
    /// Bumped per signaling connect cycle; media callbacks carrying an
    /// older generation are ignored
    generation: u64,
    handshake_in_flight: bool,
    media_params: MediaParams,
    media_urls: HashMap<MediaKind, String>,
    media_tasks: HashMap<MediaKind, JoinHandle<()>>,
}

impl Session {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            self.generation += 1;
            self.handshake_in_flight = false;
            self.set_state(SocketState::Connecting);
            log::info!(
                "Connecting signaling socket for stream {} ({})",
                self.config.stream_id,
                self.config.server_url
            );

            let outcome = match connect_async(&self.config.server_url).await {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();
                    match self.handshake(&mut write).await {
                        Ok(sent_at) => self.drive(&mut write, &mut read, &mut cmd_rx, sent_at).await,
                        Err(error) => {
                            log::warn!("Signaling handshake send failed: {}", error);
                            Outcome::Reconnect
                        }
                    }
                }
                Err(error) => {
                    self.emit(SessionEvent::Error {
                        info: self.info.clone(),
                        error: RtmsError::connection(format!(
                            "signaling connect failed: {}",
                            error
                        )),
                    });
                    Outcome::Reconnect
                }
            };

            self.teardown_media();

            match outcome {
                Outcome::Stop => break,
                Outcome::Fatal => break,
                Outcome::Reconnect => {
                    if self.stopping || !self.retryable {
                        break;
                    }
                    self.set_state(SocketState::Idle);
                    if !self.wait_reconnect(&mut cmd_rx).await {
                        break;
                    }
                }
            }
        }

        self.set_state(if self.retryable {
            SocketState::Closed
        } else {
            SocketState::Error
        });
        self.metadata.lock().unwrap().closed_at = Some(chrono::Utc::now().timestamp_millis());
        self.registry.remove(&self.config.stream_id);
        log::info!("Session {} terminated", self.config.stream_id);
    }

    /// Sends the signaling handshake and records its in-flight state
    async fn handshake(&mut self, write: &mut WsSink) -> crate::error::Result<Instant> {
        let sig = signature::sign(
            &self.config.credentials.client_id,
            &self.config.meeting_uuid,
            &self.config.stream_id,
            &self.config.credentials.client_secret,
        );
        let request = SignalingHandshakeRequest::new(
            &self.config.meeting_uuid,
            &self.config.stream_id,
            &sig,
            self.config.media_mask.0,
            self.media_params,
        );
        let sent_at = Instant::now();
        write
            .send(Message::Text(envelope::to_text(&request)?))
            .await?;
        self.handshake_in_flight = true;
        self.set_state(SocketState::Authenticated);
        Ok(sent_at)
    }

    async fn drive(
        &mut self,
        write: &mut WsSink,
        read: &mut WsSource,
        cmd_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
        handshake_sent_at: Instant,
    ) -> Outcome {
        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(outcome) =
                            self.handle_frame(write, &text, handshake_sent_at).await
                        {
                            return outcome;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!(
                            "Signaling socket closed for stream {}",
                            self.config.stream_id
                        );
                        return if self.stopping {
                            Outcome::Stop
                        } else if self.retryable {
                            Outcome::Reconnect
                        } else {
                            Outcome::Fatal
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        self.emit(SessionEvent::Error {
                            info: self.info.clone(),
                            error: RtmsError::connection(format!("signaling error: {}", error)),
                        });
                        return if self.retryable {
                            Outcome::Reconnect
                        } else {
                            Outcome::Fatal
                        };
                    }
                },
                command = cmd_rx.recv() => match command {
                    Some(SessionCommand::Stop) | None => {
                        self.stopping = true;
                        let _ = write.send(Message::Close(None)).await;
                        return Outcome::Stop;
                    }
                    Some(SessionCommand::MediaReady { kind }) => {
                        log::info!("{} media ready for stream {}", kind, self.config.stream_id);
                        let notify = envelope::MediaReadyNotification::new(
                            &self.config.stream_id,
                            kind,
                        );
                        if let Ok(text) = envelope::to_text(&notify) {
                            let _ = write.send(Message::Text(text)).await;
                        }
                    }
                    Some(SessionCommand::MediaClosed { kind, generation }) => {
                        if generation != self.generation {
                            continue;
                        }
                        self.media_tasks.remove(&kind);
                        let ready = self.state() == SocketState::Streaming;
                        if ready && self.retryable && !self.stopping {
                            self.schedule_media_reconnect(kind);
                        } else if !self.stopping {
                            // A media loss outside the ready state brings the
                            // whole session down
                            return if self.retryable {
                                Outcome::Reconnect
                            } else {
                                Outcome::Fatal
                            };
                        }
                    }
                    Some(SessionCommand::MediaReconnect { kind, generation }) => {
                        if generation == self.generation
                            && self.state() == SocketState::Streaming
                            && !self.stopping
                        {
                            self.spawn_media(kind);
                        }
                    }
                    Some(SessionCommand::MediaFatal { kind, error }) => {
                        log::error!(
                            "{} media handshake fatal for stream {}: {}",
                            kind,
                            self.config.stream_id,
                            error
                        );
                        self.retryable = false;
                        self.emit(SessionEvent::Error {
                            info: self.info.clone(),
                            error,
                        });
                        let _ = write.send(Message::Close(None)).await;
                        return Outcome::Fatal;
                    }
                },
            }
        }
    }

    /// Handles one signaling frame; `Some(outcome)` ends this connection
    async fn handle_frame(
        &mut self,
        write: &mut WsSink,
        text: &str,
        handshake_sent_at: Instant,
    ) -> Option<Outcome> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                log::warn!("Dropping malformed signaling frame: {}", error);
                return None;
            }
        };

        match message {
            ServerMessage::SignalingHandshakeResponse {
                status_code,
                reason,
                server_urls,
                media_params,
            } => {
                if !self.handshake_in_flight {
                    log::warn!("Handshake response with no handshake in flight; dropping");
                    return None;
                }
                self.handshake_in_flight = false;
                let rtt = handshake_sent_at.elapsed().as_millis() as u64;
                self.metadata.lock().unwrap().rtt_ms = Some(rtt);

                if status_code != 0 {
                    let error = RtmsError::from_status_code(status_code, "signaling handshake");
                    log::warn!(
                        "Signaling handshake rejected for stream {}: status {} ({})",
                        self.config.stream_id,
                        status_code,
                        reason.unwrap_or_default()
                    );
                    let fatal = !error.is_retryable();
                    if fatal {
                        self.retryable = false;
                    }
                    self.emit(SessionEvent::Error {
                        info: self.info.clone(),
                        error,
                    });
                    return Some(if fatal { Outcome::Fatal } else { Outcome::Reconnect });
                }

                if let Some(params) = media_params {
                    // Negotiated once; immutable for the stream's lifetime
                    self.media_params = params.to_params();
                }
                let available = available_mask(&server_urls);
                let effective = self.config.media_mask.effective(available);
                {
                    let mut metadata = self.metadata.lock().unwrap();
                    metadata.media_mask = effective;
                    metadata.media_params = self.media_params;
                }
                log::info!(
                    "Handshake accepted for stream {}: effective media mask {:?} (rtt {}ms)",
                    self.config.stream_id,
                    effective,
                    rtt
                );

                self.media_urls = server_urls
                    .iter()
                    .filter_map(|(key, url)| {
                        MediaKind::ALL
                            .iter()
                            .copied()
                            .find(|k| k.url_key() == key)
                            .map(|k| (k, url.clone()))
                    })
                    .collect();

                for kind in effective.kinds() {
                    self.spawn_media(kind);
                }

                let subscribe = EventSubscription::new(vec![
                    event_type::ACTIVE_SPEAKER_CHANGE,
                    event_type::PARTICIPANT_JOIN,
                    event_type::PARTICIPANT_LEAVE,
                ]);
                if let Ok(text) = envelope::to_text(&subscribe) {
                    let _ = write.send(Message::Text(text)).await;
                }
                self.set_state(SocketState::Streaming);
                None
            }
            ServerMessage::KeepAliveRequest { timestamp } => {
                let reply = KeepAliveResponse::new(timestamp);
                if let Ok(text) = envelope::to_text(&reply) {
                    let _ = write.send(Message::Text(text)).await;
                }
                self.metadata.lock().unwrap().last_keep_alive = Some(timestamp);
                None
            }
            ServerMessage::SignalingEvent { event_type, data } => {
                self.emit(SessionEvent::Event {
                    info: self.info.clone(),
                    event_type,
                    data,
                });
                None
            }
            ServerMessage::StreamStateChanged { state, reason, .. } => {
                self.emit(SessionEvent::StreamStateChanged {
                    info: self.info.clone(),
                    state,
                    reason,
                });
                if state == stream_state::TERMINATED && reason == stop_reason::MEETING_ENDED {
                    log::info!(
                        "Meeting ended; closing stream {}",
                        self.config.stream_id
                    );
                    self.retryable = false;
                    self.stopping = true;
                    let _ = write.send(Message::Close(None)).await;
                    return Some(Outcome::Stop);
                }
                None
            }
            ServerMessage::SessionStateChanged {
                state, stop_reason, ..
            } => {
                self.emit(SessionEvent::SessionStateChanged {
                    info: self.info.clone(),
                    state,
                    stop_reason,
                });
                None
            }
            ServerMessage::MediaHandshakeResponse { .. } | ServerMessage::Media { .. } => {
                log::warn!("Unexpected media frame on signaling socket; dropping");
                None
            }
        }
    }

    /// Single-timer reconnect debounce; returns false when stopped mid-wait
    async fn wait_reconnect(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<SessionCommand>) -> bool {
        log::info!(
            "Reconnecting stream {} in {:?}",
            self.config.stream_id,
            RECONNECT_DELAY
        );
        let sleep = tokio::time::sleep(RECONNECT_DELAY);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = cmd_rx.recv() => match command {
                    Some(SessionCommand::Stop) | None => {
                        self.stopping = true;
                        return false;
                    }
                    // Stale media callbacks from the torn-down connection
                    Some(_) => continue,
                },
            }
        }
    }

    fn spawn_media(&mut self, kind: MediaKind) {
        let Some(url) = self.media_urls.get(&kind).cloned() else {
            log::warn!("No media URL for {}; skipping", kind);
            return;
        };
        let ctx = MediaSocketContext {
            kind,
            url,
            info: self.info.clone(),
            credentials: self.config.credentials.clone(),
            params: self.media_params,
            enable_filler: self.config.enable_fillers,
            events: self.events.clone(),
            commands: self.cmd_tx.clone(),
            metadata: Arc::clone(&self.metadata),
            generation: self.generation,
        };
        if let Some(previous) = self.media_tasks.insert(kind, tokio::spawn(media::run(ctx))) {
            previous.abort();
        }
    }

    fn schedule_media_reconnect(&self, kind: MediaKind) {
        log::info!(
            "{} media socket closed; reconnecting in {:?}",
            kind,
            RECONNECT_DELAY
        );
        let cmd_tx = self.cmd_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            let _ = cmd_tx.send(SessionCommand::MediaReconnect { kind, generation });
        });
    }

    /// Aborts all media tasks; their close callbacks carry a stale
    /// generation and are ignored. Covers sockets still connecting.
    fn teardown_media(&mut self) {
        let mut metadata = self.metadata.lock().unwrap();
        for (kind, task) in self.media_tasks.drain() {
            log::debug!("Aborting {} media task", kind);
            task.abort();
            metadata.media_states.insert(kind, SocketState::Closed);
        }
    }

    fn state(&self) -> SocketState {
        self.metadata.lock().unwrap().state
    }

    fn set_state(&self, state: SocketState) {
        self.metadata.lock().unwrap().state = state;
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::debug!("event channel closed; dropping session event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_mask_from_server_urls() {
        let mut urls = HashMap::new();
        urls.insert("audio".to_string(), "wss://a".to_string());
        urls.insert("transcript".to_string(), "wss://t".to_string());
        urls.insert("bogus".to_string(), "wss://x".to_string());
        assert_eq!(available_mask(&urls), MediaMask(1 | 8));
    }

    #[test]
    fn test_subscribe_all_resolves_to_advertised() {
        let mut urls = HashMap::new();
        urls.insert("audio".to_string(), "wss://a".to_string());
        urls.insert("video".to_string(), "wss://v".to_string());
        let available = available_mask(&urls);
        let effective = MediaMask(crate::domain::models::MEDIA_MASK_ALL).effective(available);
        assert_eq!(effective, MediaMask(3));
        assert_eq!(effective.count(), 2);
    }

    #[test]
    fn test_chat_without_url_is_excluded() {
        let mut urls = HashMap::new();
        urls.insert("audio".to_string(), "wss://a".to_string());
        urls.insert("transcript".to_string(), "wss://t".to_string());
        let requested = MediaMask(1 | 8 | 16); // audio | transcript | chat
        let effective = requested.effective(available_mask(&urls));
        assert!(!effective.contains(MediaKind::Chat));
        assert_eq!(effective.count(), 2);
    }

    #[test]
    fn test_detached_handle_metadata() {
        let handle = SessionHandle::detached(
            "S1".to_string(),
            "UUID-A".to_string(),
            ProductKind::Meeting,
        );
        handle.observe_packet(10);
        handle.observe_packet(20);
        let metadata = handle.metadata();
        assert_eq!(metadata.first_packet_ts, Some(10));
        assert_eq!(metadata.last_packet_ts, Some(20));
        assert!(metadata.first_packet_ts <= metadata.last_packet_ts);
    }
}
