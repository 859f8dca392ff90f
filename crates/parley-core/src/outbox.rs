//! Outbound delivery contract between the relay and its transport.

use std::sync::Arc;

use crate::ids::ConnectionId;

/// Sink for payloads produced while handling one event.
///
/// Implementations must not block: the relay calls `deliver` from inside its
/// dispatch step and expects the payload to be queued, not written.
pub trait Outbox {
    /// Queue `payload` for delivery to `connection`.
    fn deliver(&mut self, connection: &ConnectionId, payload: Arc<String>);
}

/// One queued payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Target connection.
    pub connection: ConnectionId,
    /// Serialized JSON payload.
    pub payload: Arc<String>,
}

/// In-memory [`Outbox`] that records every delivery in order.
#[derive(Debug, Default)]
pub struct Mailbox {
    deliveries: Vec<Delivery>,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries, in the order they were queued.
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Payloads queued for `connection`, parsed as JSON, in order.
    pub fn received(&self, connection: &ConnectionId) -> Vec<serde_json::Value> {
        self.deliveries
            .iter()
            .filter(|d| &d.connection == connection)
            .filter_map(|d| serde_json::from_str(&d.payload).ok())
            .collect()
    }

    /// Number of queued deliveries.
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Whether nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Remove and return everything queued so far.
    pub fn drain(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.deliveries)
    }
}

impl Outbox for Mailbox {
    fn deliver(&mut self, connection: &ConnectionId, payload: Arc<String>) {
        self.deliveries.push(Delivery {
            connection: connection.clone(),
            payload,
        });
    }
}
