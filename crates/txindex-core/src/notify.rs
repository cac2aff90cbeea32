//! Notification hook invoked when new address activity is indexed.

/// Receives one message per newly indexed address update.
///
/// The topic is the address; the payload is the JSON-encoded transaction.
/// Implementations must not block: they are called from the sync worker.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str);
}

/// Publisher that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, _topic: &str, _payload: &str) {}
}
