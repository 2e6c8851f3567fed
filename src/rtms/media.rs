//! Media sub-socket lifecycle.
//!
//! One task per subscribed media type: dial the advertised media server,
//! authenticate with the shared handshake signature, then decode frames
//! into typed events. Audio and video optionally flow through a jitter
//! filler whose tick owns the emission; everything else is passthrough.

use crate::domain::models::{Credentials, MediaKind, MediaParams, SocketState, StreamMetadata};
use crate::error::Result;
use crate::rtms::errors::RtmsError;
use crate::rtms::events::{ChatFrame, MediaFrame, SessionEvent, StreamInfo, TranscriptFrame};
use crate::rtms::filler::{FillerConfig, FillerOutput, JitterFiller};
use crate::rtms::session::SessionCommand;
use crate::wire::envelope::{
    self, KeepAliveResponse, MediaContent, MediaHandshakeRequest, ServerMessage,
};
use crate::wire::signature;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Everything a media sub-socket task needs from its session.
///
/// The back-reference is the command channel plus a generation stamp; the
/// session ignores commands from a superseded generation, so a late close
/// callback is harmless after teardown.
pub struct MediaSocketContext {
    pub kind: MediaKind,
    pub url: String,
    pub info: StreamInfo,
    pub credentials: Credentials,
    pub params: MediaParams,
    pub enable_filler: bool,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub commands: mpsc::UnboundedSender<SessionCommand>,
    pub metadata: Arc<Mutex<StreamMetadata>>,
    pub generation: u64,
}

/// Runs one media sub-socket to completion and reports the close back to
/// the owning session.
pub async fn run(ctx: MediaSocketContext) {
    let kind = ctx.kind;
    let generation = ctx.generation;
    let commands = ctx.commands.clone();

    match run_inner(&ctx).await {
        Ok(()) => set_state(&ctx, SocketState::Closed),
        Err(error) => {
            log::warn!("{} media socket ended with error: {}", kind, error);
            set_state(&ctx, SocketState::Error);
        }
    }

    let _ = commands.send(SessionCommand::MediaClosed { kind, generation });
}

fn set_state(ctx: &MediaSocketContext, state: SocketState) {
    if let Ok(mut metadata) = ctx.metadata.lock() {
        metadata.media_states.insert(ctx.kind, state);
    }
}

async fn run_inner(ctx: &MediaSocketContext) -> Result<()> {
    log::info!("Connecting {} media socket to {}", ctx.kind, ctx.url);
    set_state(ctx, SocketState::Connecting);
    let (ws_stream, _) = connect_async(&ctx.url).await?;
    let (mut write, mut read) = ws_stream.split();

    let sig = signature::sign(
        &ctx.credentials.client_id,
        &ctx.info.meeting_uuid,
        &ctx.info.stream_id,
        &ctx.credentials.client_secret,
    );
    let handshake = MediaHandshakeRequest::new(
        &ctx.info.meeting_uuid,
        &ctx.info.stream_id,
        &sig,
        ctx.kind,
        ctx.params,
    );
    write
        .send(Message::Text(envelope::to_text(&handshake)?))
        .await?;
    set_state(ctx, SocketState::Authenticated);

    let mut filler = build_filler(ctx);
    let tick_period = filler
        .as_ref()
        .map(|f| f.frame_duration())
        .unwrap_or(Duration::from_secs(3600));
    let mut tick = tokio::time::interval(tick_period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match ServerMessage::parse(&text) {
                        Ok(ServerMessage::MediaHandshakeResponse { status_code, reason }) => {
                            if status_code == 0 {
                                log::info!("{} media handshake accepted", ctx.kind);
                                set_state(ctx, SocketState::Streaming);
                                // The ready notification (msg_type=7) goes out
                                // on the signaling socket, owned by the session
                                let _ = ctx.commands.send(SessionCommand::MediaReady { kind: ctx.kind });
                            } else {
                                let error = RtmsError::from_status_code(status_code, "media handshake");
                                log::warn!(
                                    "{} media handshake rejected: status {} ({})",
                                    ctx.kind,
                                    status_code,
                                    reason.unwrap_or_default()
                                );
                                if error.is_retryable() {
                                    emit(ctx, SessionEvent::Error { info: ctx.info.clone(), error });
                                    return Ok(());
                                }
                                let _ = ctx.commands.send(SessionCommand::MediaFatal {
                                    kind: ctx.kind,
                                    error,
                                });
                                return Ok(());
                            }
                        }
                        Ok(ServerMessage::KeepAliveRequest { timestamp }) => {
                            let reply = KeepAliveResponse::new(timestamp);
                            write.send(Message::Text(envelope::to_text(&reply)?)).await?;
                            if let Ok(mut metadata) = ctx.metadata.lock() {
                                metadata.last_keep_alive = Some(timestamp);
                            }
                        }
                        Ok(ServerMessage::Media { kind, content }) => {
                            handle_media(ctx, &mut filler, kind, content);
                        }
                        Ok(_) => {}
                        Err(error) => {
                            log::warn!("Dropping malformed {} media frame: {}", ctx.kind, error);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("{} media socket closed by server", ctx.kind);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    log::warn!("{} media socket error: {}", ctx.kind, error);
                    break;
                }
            },
            _ = tick.tick(), if filler.is_some() => {
                if let Some(output) = filler.as_mut().and_then(JitterFiller::tick) {
                    emit_output(ctx, output);
                }
            }
        }
    }

    // Terminal gap fill up to the last observed packet
    if let Some(mut filler) = filler {
        for output in filler.finish(None) {
            emit_output(ctx, output);
        }
    }

    Ok(())
}

fn build_filler(ctx: &MediaSocketContext) -> Option<JitterFiller> {
    if !ctx.enable_filler {
        return None;
    }
    let config = match ctx.kind {
        MediaKind::Audio => FillerConfig::audio(&ctx.params),
        MediaKind::Video => FillerConfig::video(&ctx.params),
        _ => return None,
    };
    Some(JitterFiller::new(config, ctx.info.clone()))
}

fn handle_media(
    ctx: &MediaSocketContext,
    filler: &mut Option<JitterFiller>,
    kind: MediaKind,
    content: MediaContent,
) {
    if let Ok(mut metadata) = ctx.metadata.lock() {
        metadata.observe_packet(content.timestamp);
    }

    match kind {
        MediaKind::Audio | MediaKind::Video | MediaKind::ShareScreen => {
            let frame = MediaFrame {
                info: ctx.info.clone(),
                buffer: content.data.unwrap_or_default(),
                user_id: content.user_id,
                user_name: content.user_name,
                timestamp: content.timestamp,
            };
            match filler {
                // ShareScreen never pages through a filler
                Some(f) if kind != MediaKind::ShareScreen => f.push(frame),
                _ => emit(ctx, wrap_frame(kind, frame)),
            }
        }
        MediaKind::Transcript => {
            emit(
                ctx,
                SessionEvent::Transcript(TranscriptFrame {
                    info: ctx.info.clone(),
                    user_id: content.user_id,
                    user_name: content.user_name,
                    text: content.text.unwrap_or_default(),
                    timestamp: content.timestamp,
                    start_time: content.start_time,
                    end_time: content.end_time,
                    language: content.language,
                    attribute: content.attribute,
                }),
            );
        }
        MediaKind::Chat => {
            emit(
                ctx,
                SessionEvent::Chat(ChatFrame {
                    info: ctx.info.clone(),
                    user_id: content.user_id,
                    user_name: content.user_name,
                    text: content.text.unwrap_or_default(),
                    timestamp: content.timestamp,
                }),
            );
        }
    }
}

fn wrap_frame(kind: MediaKind, frame: MediaFrame) -> SessionEvent {
    match kind {
        MediaKind::Video => SessionEvent::Video(frame),
        MediaKind::ShareScreen => SessionEvent::ShareScreen(frame),
        _ => SessionEvent::Audio(frame),
    }
}

fn emit_output(ctx: &MediaSocketContext, output: FillerOutput) {
    let frame = output.into_frame();
    emit(ctx, wrap_frame(ctx.kind, frame));
}

fn emit(ctx: &MediaSocketContext, event: SessionEvent) {
    if ctx.events.send(event).is_err() {
        log::debug!("event channel closed; dropping {} media event", ctx.kind);
    }
}
