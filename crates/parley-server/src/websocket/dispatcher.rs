//! Single-task event dispatcher.
//!
//! Every session reader pushes its frames into one channel; this task owns
//! the [`Relay`] and applies events strictly in arrival order. An event's
//! registry mutations and all payloads it produces are finished before the
//! next event is looked at.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use parley_core::{ConnectionId, Handled, Outbox, Relay};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::{ClientRegistry, SendOutcome};
use crate::metrics::{
    RELAY_ERRORS_TOTAL, RELAY_MESSAGES_TOTAL, RELAY_PRESENCE_SENT_TOTAL, RELAY_SUBSCRIPTIONS_TOTAL,
    WS_SEND_DROPS_TOTAL,
};

/// Input to the dispatcher.
#[derive(Debug)]
pub enum RelayEvent {
    /// A text (or UTF-8 binary) frame from `connection`.
    Text {
        /// Origin.
        connection: ConnectionId,
        /// Frame contents.
        text: String,
    },
    /// `connection` is gone. Always the last event for that connection.
    Closed {
        /// Origin.
        connection: ConnectionId,
    },
}

/// Relay-side counters published for `/health`.
#[derive(Debug, Default)]
pub struct RelayStats {
    parties: AtomicUsize,
    rooms: AtomicUsize,
}

impl RelayStats {
    /// Bound parties at the end of the last event.
    pub fn parties(&self) -> usize {
        self.parties.load(Ordering::Relaxed)
    }

    /// Non-empty rooms at the end of the last event.
    pub fn rooms(&self) -> usize {
        self.rooms.load(Ordering::Relaxed)
    }

    fn publish(&self, relay: &Relay) {
        self.parties.store(relay.party_count(), Ordering::Relaxed);
        self.rooms.store(relay.room_count(), Ordering::Relaxed);
    }
}

/// [`Outbox`] that hands payloads to the client send queues.
struct Fanout<'a> {
    clients: &'a ClientRegistry,
    dropped: u64,
}

impl Outbox for Fanout<'_> {
    fn deliver(&mut self, connection: &ConnectionId, payload: Arc<String>) {
        match self.clients.send_to(connection, payload) {
            SendOutcome::Queued => {}
            SendOutcome::Dropped => self.dropped += 1,
            SendOutcome::Gone => {
                debug!(connection = %connection, "recipient already gone, payload discarded");
            }
        }
    }
}

/// Owner of the relay state.
pub struct Dispatcher {
    relay: Relay,
    clients: Arc<ClientRegistry>,
    stats: Arc<RelayStats>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty relay.
    pub fn new(clients: Arc<ClientRegistry>, stats: Arc<RelayStats>) -> Self {
        Self {
            relay: Relay::new(),
            clients,
            stats,
        }
    }

    /// Read-only view of the relay state.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Apply one event.
    pub fn dispatch(&mut self, event: RelayEvent) {
        let mut outbox = Fanout {
            clients: &self.clients,
            dropped: 0,
        };

        match event {
            RelayEvent::Text { connection, text } => {
                match self.relay.handle(&connection, &text, &mut outbox) {
                    Ok(Handled::Subscribed { presence_sent, .. }) => {
                        counter!(RELAY_SUBSCRIPTIONS_TOTAL).increment(1);
                        counter!(RELAY_PRESENCE_SENT_TOTAL).increment(presence_sent as u64);
                    }
                    Ok(Handled::Relayed { .. }) => {
                        counter!(RELAY_MESSAGES_TOTAL).increment(1);
                    }
                    Err(err) => {
                        counter!(RELAY_ERRORS_TOTAL, "kind" => err.error_kind()).increment(1);
                    }
                }
            }
            RelayEvent::Closed { connection } => {
                if let Some(party) = self.relay.disconnect(&connection, &mut outbox) {
                    info!(connection = %connection, party = %party, "party went offline");
                }
            }
        }

        if outbox.dropped > 0 {
            counter!(WS_SEND_DROPS_TOTAL).increment(outbox.dropped);
        }
        self.stats.publish(&self.relay);
    }

    /// Consume events until the channel closes or `cancel` fires.
    pub async fn run(mut self, mut events: mpsc::Receiver<RelayEvent>, cancel: CancellationToken) {
        info!("relay dispatcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }
        info!(
            parties = self.relay.party_count(),
            rooms = self.relay.room_count(),
            "relay dispatcher stopped"
        );
    }
}
