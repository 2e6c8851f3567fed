//! End-to-end session flow against an in-process mock vendor.
//!
//! A fake signaling server and two fake media servers drive a real
//! session through handshake, media subscription, payload delivery,
//! keep-alives, and the meeting-ended teardown.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rtms_scribe::domain::models::{Credentials, MediaMask, ProductKind};
use rtms_scribe::rtms::events::SessionEvent;
use rtms_scribe::rtms::registry::ConnectionRegistry;
use rtms_scribe::rtms::session::{self, SessionConfig};
use rtms_scribe::wire::signature;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerWs = WebSocketStream<TcpStream>;

async fn next_json(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).expect("client sent invalid JSON")
            }
            Some(Ok(_)) => continue,
            other => panic!("connection ended while waiting for a frame: {:?}", other),
        }
    }
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("server send failed");
}

fn media_payload(msg_type: u8, data: &[u8], timestamp: i64) -> Value {
    json!({
        "msg_type": msg_type,
        "content": {
            "user_id": 7,
            "user_name": "Ada",
            "timestamp": timestamp,
            "data": BASE64_STANDARD.encode(data),
        }
    })
}

/// Media server: accepts one socket, checks the handshake, pushes one
/// payload, optionally runs a keep-alive round, then idles until the
/// client goes away.
fn spawn_media_server(
    listener: TcpListener,
    expected_flag: u64,
    payload: Value,
    keep_alive: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("media accept failed");
        let mut ws = accept_async(stream).await.expect("media ws upgrade failed");

        let handshake = next_json(&mut ws).await;
        assert_eq!(handshake["msg_type"], 3);
        assert_eq!(handshake["media_type"], expected_flag);
        assert!(handshake["signature"].as_str().is_some());

        send_json(&mut ws, json!({"msg_type": 4, "status_code": 0})).await;
        send_json(&mut ws, payload).await;

        if keep_alive {
            send_json(&mut ws, json!({"msg_type": 12, "timestamp": 777})).await;
            loop {
                let frame = next_json(&mut ws).await;
                if frame["msg_type"] == 13 {
                    assert_eq!(frame["timestamp"], 777);
                    break;
                }
            }
        }

        // Idle until the session tears the socket down
        while let Some(Ok(_)) = ws.next().await {}
    })
}

/// Signaling server: validates the handshake signature, advertises two
/// media URLs, waits for the subscription and both ready notifications,
/// runs a keep-alive round, then ends the meeting.
fn spawn_signaling_server(
    listener: TcpListener,
    audio_addr: SocketAddr,
    transcript_addr: SocketAddr,
    end_signal: tokio::sync::oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("signaling accept failed");
        let mut ws = accept_async(stream).await.expect("signaling ws upgrade failed");

        let handshake = next_json(&mut ws).await;
        assert_eq!(handshake["msg_type"], 1);
        assert_eq!(handshake["meeting_uuid"], "UUID-A");
        assert_eq!(handshake["rtms_stream_id"], "S1");
        assert_eq!(handshake["media_type"], 25); // audio | transcript | chat
        assert_eq!(
            handshake["signature"],
            signature::sign("client0", "UUID-A", "S1", "secret0")
        );

        send_json(
            &mut ws,
            json!({
                "msg_type": 2,
                "status_code": 0,
                "media_server": {
                    "server_urls": {
                        "audio": format!("ws://{}", audio_addr),
                        "transcript": format!("ws://{}", transcript_addr),
                    }
                },
                "media_params": {
                    "audio": {"sample_rate": 1, "send_rate": 20},
                    "video": {"fps": 25}
                }
            }),
        )
        .await;

        // Subscription and the two ready notifications arrive in any order
        let mut subscribed = false;
        let mut ready_flags = 0u64;
        while !(subscribed && ready_flags == (1 | 8)) {
            let frame = next_json(&mut ws).await;
            match frame["msg_type"].as_u64() {
                Some(5) => {
                    let events: Vec<u64> = frame["events"]
                        .as_array()
                        .expect("subscription without events")
                        .iter()
                        .filter_map(Value::as_u64)
                        .collect();
                    assert!(events.contains(&1) && events.contains(&2) && events.contains(&3));
                    subscribed = true;
                }
                Some(7) => {
                    ready_flags |= frame["media_type"].as_u64().unwrap_or(0);
                }
                Some(13) => {}
                other => panic!("unexpected signaling frame: {:?}", other),
            }
        }

        send_json(&mut ws, json!({"msg_type": 12, "timestamp": 424242})).await;
        loop {
            let frame = next_json(&mut ws).await;
            if frame["msg_type"] == 13 {
                assert_eq!(frame["timestamp"], 424242);
                break;
            }
        }

        // Meeting ends only after the test has seen both media payloads,
        // so teardown cannot race the payload delivery
        let _ = end_signal.await;
        send_json(&mut ws, json!({"msg_type": 8, "state": 4, "reason": 6})).await;
        while let Some(Ok(_)) = ws.next().await {}
    })
}

#[tokio::test]
async fn full_session_flow() {
    let signaling_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let audio_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let transcript_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let signaling_addr = signaling_listener.local_addr().unwrap();
    let audio_addr = audio_listener.local_addr().unwrap();
    let transcript_addr = transcript_listener.local_addr().unwrap();

    let (end_tx, end_rx) = tokio::sync::oneshot::channel();
    let signaling_task =
        spawn_signaling_server(signaling_listener, audio_addr, transcript_addr, end_rx);
    let audio_task = spawn_media_server(
        audio_listener,
        1,
        media_payload(14, &[1, 2, 3, 4], 1_000),
        true,
    );
    let transcript_task = spawn_media_server(
        transcript_listener,
        8,
        media_payload(17, b"hello world", 2_000),
        false,
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(ConnectionRegistry::new());
    let handle = session::spawn(
        SessionConfig {
            stream_id: "S1".to_string(),
            meeting_uuid: "UUID-A".to_string(),
            server_url: format!("ws://{}", signaling_addr),
            product: ProductKind::Meeting,
            credentials: Credentials {
                client_id: "client0".to_string(),
                client_secret: "secret0".to_string(),
                secret_token: "token0".to_string(),
            },
            media_mask: MediaMask(1 | 8 | 16), // chat has no URL and must not connect
            enable_fillers: false,
        },
        events_tx,
        Arc::clone(&registry),
    );
    assert!(registry.add(handle));

    // Phase 1: media flows on both sub-sockets
    let mut saw_audio = false;
    let mut saw_transcript = false;
    let media_phase = async {
        while !(saw_audio && saw_transcript) {
            match events_rx.recv().await.expect("event stream closed early") {
                SessionEvent::Audio(frame) => {
                    assert_eq!(frame.buffer, vec![1, 2, 3, 4]);
                    assert_eq!(frame.user_name, "Ada");
                    assert_eq!(frame.info.stream_id, "S1");
                    saw_audio = true;
                }
                SessionEvent::Transcript(frame) => {
                    assert_eq!(frame.text, "hello world");
                    assert_eq!(frame.timestamp, 2_000);
                    saw_transcript = true;
                }
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), media_phase)
        .await
        .expect("timed out waiting for media events");

    // Phase 2: let the server end the meeting and watch the state change
    end_tx.send(()).expect("signaling server gone");
    let end_phase = async {
        loop {
            if let SessionEvent::StreamStateChanged { state, reason, .. } =
                events_rx.recv().await.expect("event stream closed early")
            {
                if state == 4 {
                    assert_eq!(reason, 6);
                    break;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), end_phase)
        .await
        .expect("timed out waiting for meeting end");

    // The session archives itself once the meeting ends
    let removed = async {
        while registry.has("S1") {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), removed)
        .await
        .expect("session did not leave the registry");

    // Post-mortem metadata stays resolvable from the history ring
    let metadata = registry
        .stream_metadata("S1")
        .expect("archived stream metadata");
    assert_eq!(metadata.first_packet_ts, Some(1_000));
    assert_eq!(metadata.last_packet_ts, Some(2_000));
    assert!(metadata.last_keep_alive.is_some());
    assert_eq!(metadata.media_mask, MediaMask(1 | 8));
    assert!(metadata.closed_at.is_some());
    assert_eq!(metadata.media_states.len(), 2);
    assert!(metadata
        .media_states
        .values()
        .all(|state| *state == rtms_scribe::domain::models::SocketState::Closed));

    // Server-side assertions all held
    tokio::time::timeout(Duration::from_secs(5), signaling_task)
        .await
        .expect("signaling server hung")
        .expect("signaling server assertions failed");
    tokio::time::timeout(Duration::from_secs(5), audio_task)
        .await
        .expect("audio server hung")
        .expect("audio server assertions failed");
    tokio::time::timeout(Duration::from_secs(5), transcript_task)
        .await
        .expect("transcript server hung")
        .expect("transcript server assertions failed");
}

#[tokio::test]
async fn non_retryable_handshake_disables_session() {
    let signaling_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let signaling_addr = signaling_listener.local_addr().unwrap();

    // Reject the handshake with a signature error (status 15)
    let server = tokio::spawn(async move {
        let (stream, _) = signaling_listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let handshake = next_json(&mut ws).await;
        assert_eq!(handshake["msg_type"], 1);
        send_json(&mut ws, json!({"msg_type": 2, "status_code": 15})).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(ConnectionRegistry::new());
    let handle = session::spawn(
        SessionConfig {
            stream_id: "S1".to_string(),
            meeting_uuid: "UUID-A".to_string(),
            server_url: format!("ws://{}", signaling_addr),
            product: ProductKind::Meeting,
            credentials: Credentials {
                client_id: "client0".to_string(),
                client_secret: "secret0".to_string(),
                secret_token: "token0".to_string(),
            },
            media_mask: MediaMask(1),
            enable_fillers: false,
        },
        events_tx,
        Arc::clone(&registry),
    );
    assert!(registry.add(handle));

    // The session emits a security error and shuts down without retrying
    let error = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let SessionEvent::Error { error, .. } =
                events_rx.recv().await.expect("event stream closed early")
            {
                return error;
            }
        }
    })
    .await
    .expect("no error event emitted");
    assert_eq!(error.category.to_string(), "security");
    assert!(!error.is_retryable());

    tokio::time::timeout(Duration::from_secs(10), async {
        while registry.has("S1") {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("session did not terminate");

    // A fresh started event may now create a new session for the same id
    assert!(registry.add(rtms_scribe::rtms::session::SessionHandle::detached(
        "S1".to_string(),
        "UUID-A".to_string(),
        ProductKind::Meeting,
    )));

    server.abort();
}
