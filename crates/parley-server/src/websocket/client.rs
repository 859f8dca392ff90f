//! Registry of connected WebSocket clients and their send queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parley_core::ConnectionId;
use tokio::sync::mpsc;

/// A connected WebSocket client as seen by the sending side.
pub struct ClientConnection {
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    dropped: AtomicU64,
}

impl ClientConnection {
    fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            tx,
            connected_at: Instant::now(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Payloads dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Result of [`ClientRegistry::send_to`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Payload is in the client's queue.
    Queued,
    /// Queue full; payload discarded.
    Dropped,
    /// No such client, or its writer is gone.
    Gone,
}

/// Every open connection, keyed by its id.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, ClientConnection>,
    max_send_queue: usize,
}

impl ClientRegistry {
    /// Create an empty registry whose clients queue up to `max_send_queue` payloads.
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a new client and return its id plus the receiving end of its queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Arc<String>>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = self.clients.insert(id.clone(), ClientConnection::new(tx));
        (id, rx)
    }

    /// Remove a client. Dropping its sender lets the writer drain and exit.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Queue `payload` for `id` without waiting.
    pub fn send_to(&self, id: &ConnectionId, payload: Arc<String>) -> SendOutcome {
        let Some(client) = self.clients.get(id) else {
            return SendOutcome::Gone;
        };
        match client.tx.try_send(payload) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(payload)) => {
                let _ = client.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    connection = %id,
                    payload_len = payload.len(),
                    "send queue full, dropping payload"
                );
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Gone,
        }
    }

    /// Payloads dropped for `id` so far.
    pub fn drop_count(&self, id: &ConnectionId) -> Option<u64> {
        self.clients.get(id).map(|c| c.drop_count())
    }

    /// Age of the connection `id`.
    pub fn age(&self, id: &ConnectionId) -> Option<Duration> {
        self.clients.get(id).map(|c| c.age())
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }
}
