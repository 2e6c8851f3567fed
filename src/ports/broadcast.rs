/// Broadcaster port trait
///
/// Per-meeting push channel for live client updates. Delivery is
/// fire-and-forget, at-least-once best effort; de-duplication is the
/// client's responsibility.
use serde_json::Value;
use tokio::sync::broadcast;

/// Port trait for live client broadcasting
pub trait BroadcasterPort: Send + Sync {
    /// Publish one event to every subscriber of a meeting
    fn publish(&self, meeting_uuid: &str, event: Value);

    /// Subscribe to a meeting's event stream
    fn subscribe(&self, meeting_uuid: &str) -> broadcast::Receiver<Value>;

    /// Drop the meeting's channel once the meeting is over
    fn close_meeting(&self, meeting_uuid: &str);
}
