//! Room membership.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::ids::{PartyId, RoomId};

/// Rooms and their members, plus the inverse party → room map.
///
/// A room exists only while it has members. Member sets keep join order so
/// presence fan-out is deterministic.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, IndexSet<PartyId>>,
    party_rooms: HashMap<PartyId, RoomId>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `party` to `room`, creating the room if needed.
    ///
    /// Returns the member set after insertion. A party already recorded in a
    /// different room is moved; the relay never asks for that because a bound
    /// party cannot subscribe again.
    pub fn join(&mut self, party: &PartyId, room: &RoomId) -> &IndexSet<PartyId> {
        if self.party_rooms.get(party).is_some_and(|current| current != room) {
            let _ = self.leave(party);
        }
        let _ = self.party_rooms.insert(party.clone(), room.clone());
        let members = self.rooms.entry(room.clone()).or_default();
        let _ = members.insert(party.clone());
        members
    }

    /// Remove `party` from its room, deleting the room if it empties.
    ///
    /// Returns the room the party left.
    pub fn leave(&mut self, party: &PartyId) -> Option<RoomId> {
        let room = self.party_rooms.remove(party)?;
        if let Some(members) = self.rooms.get_mut(&room) {
            let _ = members.shift_remove(party);
            if members.is_empty() {
                let _ = self.rooms.remove(&room);
            }
        }
        Some(room)
    }

    /// Members of `room`, in join order.
    pub fn members_of(&self, room: &RoomId) -> Option<&IndexSet<PartyId>> {
        self.rooms.get(room)
    }

    /// Room `party` belongs to.
    pub fn room_of(&self, party: &PartyId) -> Option<&RoomId> {
        self.party_rooms.get(party)
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
