//! Presence fan-out to room peers.

use tracing::trace;

use crate::ids::PartyId;
use crate::outbox::Outbox;
use crate::protocol::{self, Event, PresenceNotice};
use crate::registry::{ConnectionRegistry, RoomRegistry};

/// Read-only view over the registries that announces presence changes.
pub struct PresenceNotifier<'a> {
    connections: &'a ConnectionRegistry,
    rooms: &'a RoomRegistry,
}

impl<'a> PresenceNotifier<'a> {
    /// Borrow the registries for one announcement pass.
    pub fn new(connections: &'a ConnectionRegistry, rooms: &'a RoomRegistry) -> Self {
        Self { connections, rooms }
    }

    /// Tell every other member of `party`'s room that it is now `online`.
    ///
    /// No-op when the party has no room. Members without a bound connection
    /// are skipped. Returns the number of payloads queued.
    pub fn announce(&self, party: &PartyId, online: bool, outbox: &mut impl Outbox) -> usize {
        let Some(room) = self.rooms.room_of(party) else {
            return 0;
        };
        let Some(members) = self.rooms.members_of(room) else {
            return 0;
        };

        let event = Event::Presence(PresenceNotice {
            from_party_id: party.clone(),
            room_id: room.clone(),
            online,
        });
        let Some(payload) = protocol::encode(&event) else {
            return 0;
        };

        let mut sent = 0;
        for member in members.iter().filter(|m| *m != party) {
            if let Some(connection) = self.connections.connection_of(member) {
                outbox.deliver(connection, payload.clone());
                sent += 1;
            }
        }
        trace!(party = %party, room = %room, online, recipients = sent, "presence announced");
        sent
    }
}
