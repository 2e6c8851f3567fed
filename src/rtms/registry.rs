//! Process-wide index of live stream sessions plus a bounded history of
//! terminated ones for post-mortem queries.

use crate::domain::models::StreamMetadata;
use crate::rtms::session::SessionHandle;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Live sessions keyed by stream id, with terminal snapshots retained in a
/// bounded ring. Metadata accessors consult the active map first, then the
/// history, so a stream's record stays resolvable for a bounded time after
/// the meeting ends.
pub struct ConnectionRegistry {
    active: Mutex<HashMap<String, SessionHandle>>,
    history: Mutex<VecDeque<StreamMetadata>>,
    history_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_capacity,
        }
    }

    /// Registers a session. Fails if the stream id already has a live
    /// session; exactly one session per stream id may exist at a time.
    pub fn add(&self, handle: SessionHandle) -> bool {
        let mut active = self.active.lock().unwrap();
        if active.contains_key(handle.stream_id()) {
            return false;
        }
        active.insert(handle.stream_id().to_string(), handle);
        true
    }

    pub fn get(&self, stream_id: &str) -> Option<SessionHandle> {
        self.active.lock().unwrap().get(stream_id).cloned()
    }

    pub fn has(&self, stream_id: &str) -> bool {
        self.active.lock().unwrap().contains_key(stream_id)
    }

    pub fn find_by_meeting_uuid(&self, meeting_uuid: &str) -> Vec<SessionHandle> {
        self.active
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.meeting_uuid() == meeting_uuid)
            .cloned()
            .collect()
    }

    /// Removes a session and archives its terminal stats into the history
    /// ring, evicting the oldest entry when full.
    pub fn remove(&self, stream_id: &str) -> Option<SessionHandle> {
        let handle = self.active.lock().unwrap().remove(stream_id)?;

        let mut snapshot = handle.metadata();
        if snapshot.closed_at.is_none() {
            snapshot.closed_at = Some(chrono::Utc::now().timestamp_millis());
        }

        let mut history = self.history.lock().unwrap();
        // A re-created stream id replaces its older archive entry
        history.retain(|m| m.stream_id != stream_id);
        history.push_back(snapshot);
        while history.len() > self.history_capacity {
            history.pop_front();
        }

        Some(handle)
    }

    pub fn clear(&self) -> Vec<SessionHandle> {
        let mut active = self.active.lock().unwrap();
        active.drain().map(|(_, handle)| handle).collect()
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    /// Resolves a stream's metadata from the active map or, after removal,
    /// from the history ring.
    pub fn stream_metadata(&self, stream_id: &str) -> Option<StreamMetadata> {
        if let Some(handle) = self.active.lock().unwrap().get(stream_id) {
            return Some(handle.metadata());
        }
        self.history
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.stream_id == stream_id)
            .cloned()
    }

    /// First/last packet timestamps for a live or recently ended stream
    pub fn stream_timestamps(&self, stream_id: &str) -> Option<(Option<i64>, Option<i64>)> {
        self.stream_metadata(stream_id)
            .map(|m| (m.first_packet_ts, m.last_packet_ts))
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ProductKind;
    use crate::rtms::session::SessionHandle;

    fn handle(stream_id: &str, meeting_uuid: &str) -> SessionHandle {
        SessionHandle::detached(
            stream_id.to_string(),
            meeting_uuid.to_string(),
            ProductKind::Meeting,
        )
    }

    #[test]
    fn test_one_session_per_stream_id() {
        let registry = ConnectionRegistry::new();
        assert!(registry.add(handle("S1", "M1")));
        assert!(!registry.add(handle("S1", "M2")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_by_meeting_uuid() {
        let registry = ConnectionRegistry::new();
        registry.add(handle("S1", "M1"));
        registry.add(handle("S2", "M1"));
        registry.add(handle("S3", "M2"));
        assert_eq!(registry.find_by_meeting_uuid("M1").len(), 2);
        assert_eq!(registry.find_by_meeting_uuid("M3").len(), 0);
    }

    #[test]
    fn test_metadata_survives_removal() {
        let registry = ConnectionRegistry::new();
        let h = handle("S1", "M1");
        h.observe_packet(100);
        h.observe_packet(500);
        registry.add(h);

        registry.remove("S1");
        assert!(!registry.has("S1"));
        assert_eq!(registry.history_len(), 1);

        let metadata = registry.stream_metadata("S1").expect("archived metadata");
        assert_eq!(metadata.first_packet_ts, Some(100));
        assert_eq!(metadata.last_packet_ts, Some(500));
        assert!(metadata.closed_at.is_some());
        assert_eq!(registry.stream_timestamps("S1"), Some((Some(100), Some(500))));
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = ConnectionRegistry::with_history_capacity(3);
        for i in 0..5 {
            let id = format!("S{}", i);
            registry.add(handle(&id, "M"));
            registry.remove(&id);
        }
        assert_eq!(registry.history_len(), 3);
        // Oldest entries evicted first
        assert!(registry.stream_metadata("S0").is_none());
        assert!(registry.stream_metadata("S4").is_some());
    }

    #[test]
    fn test_recreated_stream_replaces_archive_entry() {
        let registry = ConnectionRegistry::new();
        registry.add(handle("S1", "M1"));
        registry.remove("S1");
        registry.add(handle("S1", "M1"));
        registry.remove("S1");
        assert_eq!(registry.history_len(), 1);
    }

    #[test]
    fn test_clear_drains_active() {
        let registry = ConnectionRegistry::new();
        registry.add(handle("S1", "M1"));
        registry.add(handle("S2", "M2"));
        let drained = registry.clear();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
