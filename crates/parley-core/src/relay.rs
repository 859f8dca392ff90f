//! `Relay`: the per-event dispatcher that owns all session state.
//!
//! The transport calls [`Relay::handle`] for every inbound text payload and
//! [`Relay::disconnect`] once when a connection goes away. Each call runs to
//! completion (registry mutations plus every payload it produces) before the
//! next one starts, so the registries need no locking.

use indexmap::IndexSet;
use serde_json::value::RawValue;
use tracing::debug;

use crate::errors::RelayError;
use crate::ids::{ConnectionId, PartyId, RoomId};
use crate::outbox::Outbox;
use crate::presence::PresenceNotifier;
use crate::protocol::{self, ErrorNotice, Event, RelayedMessage, Request};
use crate::registry::{ConnectionRegistry, RoomRegistry};

/// Outcome of a request that was accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handled {
    /// Connection bound to `party`, which joined `room`.
    Subscribed {
        /// The newly bound party.
        party: PartyId,
        /// Room joined.
        room: RoomId,
        /// Room size after joining.
        members: usize,
        /// Presence payloads queued by the re-announce.
        presence_sent: usize,
    },
    /// A message was forwarded.
    Relayed {
        /// Verified sender.
        from: PartyId,
        /// Recipient.
        to: PartyId,
        /// Room named by the sender.
        room: RoomId,
    },
}

/// Owner of the connection and room registries.
#[derive(Debug, Default)]
pub struct Relay {
    connections: ConnectionRegistry,
    rooms: RoomRegistry,
}

impl Relay {
    /// Create a relay with empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one inbound text payload from `connection`.
    ///
    /// On rejection a single `{"error": ...}` payload is queued for
    /// `connection` and the error is returned for the caller's bookkeeping;
    /// registry state is left as it was.
    pub fn handle(
        &mut self,
        connection: &ConnectionId,
        raw: &str,
        outbox: &mut impl Outbox,
    ) -> Result<Handled, RelayError> {
        let result = Request::parse(raw).and_then(|request| {
            debug!(connection = %connection, action = request.action(), "dispatching request");
            match request {
                Request::Subscribe { party_id, room_id } => {
                    self.subscribe(connection, party_id, room_id, outbox)
                }
                Request::Message {
                    party_id,
                    room_id,
                    to_party_id,
                    msg,
                } => self.forward(connection, party_id, room_id, to_party_id, msg, outbox),
            }
        });

        if let Err(ref err) = result {
            debug!(
                connection = %connection,
                kind = ?err.kind(),
                error_kind = err.error_kind(),
                "request rejected"
            );
            if let Some(payload) = protocol::encode(&ErrorNotice::from(err)) {
                outbox.deliver(connection, payload);
            }
        }
        result
    }

    /// Tear down everything bound to `connection`.
    ///
    /// The offline notice goes out while the party is still a room member;
    /// only then is the membership removed. Returns the party that was bound.
    pub fn disconnect(
        &mut self,
        connection: &ConnectionId,
        outbox: &mut impl Outbox,
    ) -> Option<PartyId> {
        let party = self.connections.unbind(connection)?;
        let presence_sent =
            PresenceNotifier::new(&self.connections, &self.rooms).announce(&party, false, outbox);
        let room = self.rooms.leave(&party);
        debug!(
            connection = %connection,
            party = %party,
            room = room.as_ref().map(RoomId::as_str),
            presence_sent,
            "party unsubscribed"
        );
        Some(party)
    }

    fn subscribe(
        &mut self,
        connection: &ConnectionId,
        party: PartyId,
        room: RoomId,
        outbox: &mut impl Outbox,
    ) -> Result<Handled, RelayError> {
        self.connections.bind(connection, &party)?;
        let members: Vec<PartyId> = self.rooms.join(&party, &room).iter().cloned().collect();

        // Every member is re-announced, not only the newcomer.
        let notifier = PresenceNotifier::new(&self.connections, &self.rooms);
        let presence_sent = members
            .iter()
            .map(|member| notifier.announce(member, true, outbox))
            .sum();

        debug!(
            connection = %connection,
            party = %party,
            room = %room,
            members = members.len(),
            presence_sent,
            "party subscribed"
        );
        Ok(Handled::Subscribed {
            party,
            room,
            members: members.len(),
            presence_sent,
        })
    }

    fn forward(
        &self,
        connection: &ConnectionId,
        party: PartyId,
        room: RoomId,
        to: PartyId,
        msg: Box<RawValue>,
        outbox: &mut impl Outbox,
    ) -> Result<Handled, RelayError> {
        let recipient = self
            .connections
            .connection_of(&to)
            .ok_or(RelayError::RecipientNotSubscribed)?;
        let members = self
            .rooms
            .members_of(&room)
            .ok_or(RelayError::RoomNotFound)?;
        if !members.contains(&party) {
            return Err(RelayError::NotRoomMember);
        }
        if self.connections.party_of(connection) != Some(&party) {
            return Err(RelayError::IdentityMismatch);
        }

        let event = Event::Message(RelayedMessage {
            from_party_id: party.clone(),
            room_id: room.clone(),
            msg,
        });
        if let Some(payload) = protocol::encode(&event) {
            outbox.deliver(recipient, payload);
        }
        debug!(from = %party, to = %to, room = %room, "message relayed");
        Ok(Handled::Relayed {
            from: party,
            to,
            room,
        })
    }

    /// Party bound to `connection`.
    pub fn party_of(&self, connection: &ConnectionId) -> Option<&PartyId> {
        self.connections.party_of(connection)
    }

    /// Connection bound to `party`.
    pub fn connection_of(&self, party: &PartyId) -> Option<&ConnectionId> {
        self.connections.connection_of(party)
    }

    /// Room `party` is in.
    pub fn room_of(&self, party: &PartyId) -> Option<&RoomId> {
        self.rooms.room_of(party)
    }

    /// Members of `room`, in join order.
    pub fn members_of(&self, room: &RoomId) -> Option<&IndexSet<PartyId>> {
        self.rooms.members_of(room)
    }

    /// Number of bound parties.
    pub fn party_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Mailbox;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn conn(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn subscribe(party: &str, room: &str) -> String {
        json!({"action": "subscribe", "partyId": party, "roomId": room}).to_string()
    }

    fn message(party: &str, room: &str, to: &str, msg: &str) -> String {
        json!({"action": "message", "partyId": party, "roomId": room, "toPartyId": to, "msg": msg})
            .to_string()
    }

    fn presence(from: &str, room: &str, online: bool) -> Value {
        json!({"action": "presence", "fromPartyId": from, "roomId": room, "online": online})
    }

    fn error(text: &str) -> Value {
        json!({"error": text})
    }

    /// Two parties, p1 on c1 and p2 on c2, both in r1.
    fn two_in_room() -> Relay {
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c1"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap();
        let _ = relay
            .handle(&conn("c2"), &subscribe("p2", "r1"), &mut mailbox)
            .unwrap();
        relay
    }

    #[test]
    fn first_subscriber_gets_no_presence() {
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();
        let handled = relay
            .handle(&conn("c1"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap();

        assert_eq!(
            handled,
            Handled::Subscribed {
                party: PartyId::from("p1"),
                room: RoomId::from("r1"),
                members: 1,
                presence_sent: 0,
            }
        );
        assert!(mailbox.is_empty());
        assert_eq!(relay.party_of(&conn("c1")), Some(&PartyId::from("p1")));
        assert_eq!(relay.room_of(&PartyId::from("p1")), Some(&RoomId::from("r1")));
    }

    #[test]
    fn end_to_end_scenario() {
        let (c1, c2) = (conn("c1"), conn("c2"));
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();

        let _ = relay.handle(&c1, &subscribe("p1", "r1"), &mut mailbox).unwrap();
        let _ = relay.handle(&c2, &subscribe("p2", "r1"), &mut mailbox).unwrap();
        assert_eq!(mailbox.received(&c1), vec![presence("p2", "r1", true)]);
        assert_eq!(mailbox.received(&c2), vec![presence("p1", "r1", true)]);

        let _ = mailbox.drain();
        let _ = relay
            .handle(&c1, &message("p1", "r1", "p2", "hello"), &mut mailbox)
            .unwrap();
        assert_eq!(
            mailbox.received(&c2),
            vec![json!({"action": "message", "fromPartyId": "p1", "roomId": "r1", "msg": "hello"})]
        );
        assert!(mailbox.received(&c1).is_empty());

        let _ = mailbox.drain();
        assert_eq!(relay.disconnect(&c2, &mut mailbox), Some(PartyId::from("p2")));
        assert_eq!(mailbox.received(&c1), vec![presence("p2", "r1", false)]);
        let members: Vec<&str> = relay
            .members_of(&RoomId::from("r1"))
            .unwrap()
            .iter()
            .map(PartyId::as_str)
            .collect();
        assert_eq!(members, ["p1"]);
    }

    #[test]
    fn join_re_announces_every_member() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let handled = relay
            .handle(&conn("c3"), &subscribe("p3", "r1"), &mut mailbox)
            .unwrap();
        assert_matches!(handled, Handled::Subscribed { members: 3, presence_sent: 6, .. });

        // Announcements run in join order: p1, then p2, then p3.
        assert_eq!(
            mailbox.received(&conn("c1")),
            vec![presence("p2", "r1", true), presence("p3", "r1", true)]
        );
        assert_eq!(
            mailbox.received(&conn("c2")),
            vec![presence("p1", "r1", true), presence("p3", "r1", true)]
        );
        assert_eq!(
            mailbox.received(&conn("c3")),
            vec![presence("p1", "r1", true), presence("p2", "r1", true)]
        );
    }

    #[test]
    fn same_party_on_second_connection_is_rejected() {
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c1"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap();

        let err = relay
            .handle(&conn("c2"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::AlreadySubscribed);
        assert_eq!(mailbox.received(&conn("c2")), vec![error("Already subscribed")]);
        assert_eq!(relay.connection_of(&PartyId::from("p1")), Some(&conn("c1")));
        assert!(relay.party_of(&conn("c2")).is_none());
    }

    #[test]
    fn bound_connection_cannot_subscribe_again() {
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c1"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap();

        let err = relay
            .handle(&conn("c1"), &subscribe("p9", "r2"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::AlreadySubscribed);
        assert!(relay.connection_of(&PartyId::from("p9")).is_none());
        assert!(relay.members_of(&RoomId::from("r2")).is_none());
    }

    #[test]
    fn party_cannot_move_rooms_while_bound() {
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c1"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap();

        let err = relay
            .handle(&conn("c1"), &subscribe("p1", "r2"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::AlreadySubscribed);
        assert_eq!(relay.room_of(&PartyId::from("p1")), Some(&RoomId::from("r1")));
        assert!(relay.members_of(&RoomId::from("r2")).is_none());
    }

    #[test]
    fn party_can_resubscribe_after_disconnect() {
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c1"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap();
        let _ = relay.disconnect(&conn("c1"), &mut mailbox);

        let _ = relay
            .handle(&conn("c2"), &subscribe("p1", "r2"), &mut mailbox)
            .unwrap();
        assert_eq!(relay.connection_of(&PartyId::from("p1")), Some(&conn("c2")));
        assert_eq!(relay.room_of(&PartyId::from("p1")), Some(&RoomId::from("r2")));
    }

    #[test]
    fn msg_is_forwarded_byte_for_byte() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let raw = r#"{"action":"message","partyId":"p1","roomId":"r1","toPartyId":"p2","msg":{"z": 1.50,  "a" :[1e3, "é"]}}"#;
        let _ = relay.handle(&conn("c1"), raw, &mut mailbox).unwrap();

        let delivered = &mailbox.deliveries()[0];
        assert_eq!(delivered.connection, conn("c2"));
        assert_eq!(
            delivered.payload.as_str(),
            r#"{"action":"message","fromPartyId":"p1","roomId":"r1","msg":{"z": 1.50,  "a" :[1e3, "é"]}}"#
        );
    }

    #[test]
    fn out_of_range_number_msg_is_relayed() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let raw = r#"{"action":"message","partyId":"p1","roomId":"r1","toPartyId":"p2","msg":1e400}"#;
        let _ = relay.handle(&conn("c1"), raw, &mut mailbox).unwrap();

        let delivered = &mailbox.deliveries()[0];
        assert_eq!(delivered.connection, conn("c2"));
        assert_eq!(
            delivered.payload.as_str(),
            r#"{"action":"message","fromPartyId":"p1","roomId":"r1","msg":1e400}"#
        );
    }

    #[test]
    fn message_to_unsubscribed_party() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let err = relay
            .handle(&conn("c1"), &message("p1", "r1", "nobody", "hi"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::RecipientNotSubscribed);
        assert_eq!(mailbox.deliveries().len(), 1);
        assert_eq!(
            mailbox.received(&conn("c1")),
            vec![error("toPartyId not subscribed")]
        );
    }

    #[test]
    fn message_to_missing_room() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let err = relay
            .handle(&conn("c1"), &message("p1", "nowhere", "p2", "hi"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::RoomNotFound);
        assert_eq!(mailbox.received(&conn("c1")), vec![error("roomId not found")]);
        assert!(mailbox.received(&conn("c2")).is_empty());
    }

    #[test]
    fn message_from_non_member() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c3"), &subscribe("p3", "r2"), &mut mailbox)
            .unwrap();
        let _ = mailbox.drain();

        let err = relay
            .handle(&conn("c3"), &message("p3", "r1", "p2", "hi"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::NotRoomMember);
        assert_eq!(mailbox.received(&conn("c3")), vec![error("partyId not in roomId")]);
        assert!(mailbox.received(&conn("c2")).is_empty());
    }

    #[test]
    fn impersonation_is_rejected() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        // c2 is bound to p2 but claims to be p1.
        let err = relay
            .handle(&conn("c2"), &message("p1", "r1", "p2", "hi"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::IdentityMismatch);
        assert_eq!(mailbox.received(&conn("c2")), vec![error("partyId does not match")]);
        assert!(mailbox.received(&conn("c1")).is_empty());
    }

    #[test]
    fn unbound_connection_cannot_send() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let err = relay
            .handle(&conn("stranger"), &message("p1", "r1", "p2", "hi"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::IdentityMismatch);
    }

    #[test]
    fn validation_order_checks_recipient_before_room() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let err = relay
            .handle(&conn("c1"), &message("p1", "nowhere", "nobody", "hi"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::RecipientNotSubscribed);
    }

    #[test]
    fn party_may_message_itself() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c1"), &message("p1", "r1", "p1", "echo"), &mut mailbox)
            .unwrap();
        assert_eq!(mailbox.received(&conn("c1")).len(), 1);
    }

    #[test]
    fn malformed_payloads_yield_one_error_and_no_state_change() {
        let cases = [
            ("not json", "Error processing message"),
            ("null", "Error processing message"),
            ("[1,2]", "Invalid action"),
            ("42", "Invalid action"),
            (r#""x""#, "Invalid action"),
            ("true", "Invalid action"),
            ("{}", "Invalid action"),
            (r#"{"action":"dance"}"#, "Invalid action"),
            (r#"{"action":"subscribe","partyId":"p9"}"#, "Invalid partyId or roomId"),
            (
                r#"{"action":"message","partyId":"p1","roomId":"r1","toPartyId":"p2"}"#,
                "Invalid partyId, roomId, toPartyId or msg",
            ),
        ];
        for (raw, expected) in cases {
            let mut relay = two_in_room();
            let mut mailbox = Mailbox::new();
            assert!(relay.handle(&conn("c1"), raw, &mut mailbox).is_err());
            assert_eq!(mailbox.deliveries().len(), 1, "{raw}");
            assert_eq!(mailbox.received(&conn("c1")), vec![error(expected)], "{raw}");
            assert_eq!(relay.party_count(), 2);
            assert_eq!(relay.room_count(), 1);
            assert_eq!(relay.members_of(&RoomId::from("r1")).unwrap().len(), 2);
        }
    }

    #[test]
    fn disconnect_of_last_member_deletes_room() {
        let mut relay = Relay::new();
        let mut mailbox = Mailbox::new();
        let _ = relay
            .handle(&conn("c1"), &subscribe("p1", "r1"), &mut mailbox)
            .unwrap();

        assert_eq!(relay.disconnect(&conn("c1"), &mut mailbox), Some(PartyId::from("p1")));
        assert!(mailbox.is_empty());
        assert!(relay.members_of(&RoomId::from("r1")).is_none());
        assert!(relay.room_of(&PartyId::from("p1")).is_none());
        assert!(relay.connection_of(&PartyId::from("p1")).is_none());
        assert_eq!(relay.room_count(), 0);
    }

    #[test]
    fn messages_to_departed_party_are_rejected() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let _ = relay.disconnect(&conn("c2"), &mut mailbox);
        let _ = mailbox.drain();

        let err = relay
            .handle(&conn("c1"), &message("p1", "r1", "p2", "hi"), &mut mailbox)
            .unwrap_err();
        assert_eq!(err, RelayError::RecipientNotSubscribed);
    }

    #[test]
    fn disconnect_of_unbound_connection_is_noop() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        assert_eq!(relay.disconnect(&conn("stranger"), &mut mailbox), None);
        assert!(mailbox.is_empty());
        assert_eq!(relay.party_count(), 2);
    }

    #[test]
    fn disconnect_twice_is_noop() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        assert!(relay.disconnect(&conn("c2"), &mut mailbox).is_some());
        assert!(relay.disconnect(&conn("c2"), &mut mailbox).is_none());
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn errors_never_reach_other_connections() {
        let mut relay = two_in_room();
        let mut mailbox = Mailbox::new();
        let _ = relay.handle(&conn("c1"), "garbage", &mut mailbox);
        assert!(mailbox.received(&conn("c2")).is_empty());
    }
}
