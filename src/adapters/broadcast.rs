//! Live client broadcaster
//!
//! Per-meeting `tokio::sync::broadcast` channels. Publishing never blocks
//! ingestion; a subscriber that falls behind loses messages (lagged
//! receiver) and re-syncs from the index.

use crate::ports::broadcast::BroadcasterPort;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast-channel implementation of the broadcaster port
#[derive(Default)]
pub struct ChannelBroadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meeting_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}

impl BroadcasterPort for ChannelBroadcaster {
    fn publish(&self, meeting_uuid: &str, event: Value) {
        let channels = self.channels.lock().unwrap();
        if let Some(sender) = channels.get(meeting_uuid) {
            // Err means no live subscribers; fire-and-forget
            let _ = sender.send(event);
        }
    }

    fn subscribe(&self, meeting_uuid: &str) -> broadcast::Receiver<Value> {
        self.channels
            .lock()
            .unwrap()
            .entry(meeting_uuid.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn close_meeting(&self, meeting_uuid: &str) {
        // Dropping the sender ends every receiver's stream
        self.channels.lock().unwrap().remove(meeting_uuid);
    }
}
