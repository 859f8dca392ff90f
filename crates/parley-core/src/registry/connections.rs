//! Connection ↔ party bindings.

use std::collections::HashMap;

use thiserror::Error;

use crate::ids::{ConnectionId, PartyId};

/// Why a binding was refused.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BindError {
    /// The connection already has a party, or the party already has a connection.
    #[error("already bound")]
    AlreadyBound,
}

/// Bidirectional map between live connections and the parties bound to them.
///
/// Both directions are kept in lockstep: a connection maps to at most one
/// party and a party to at most one connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_connection: HashMap<ConnectionId, PartyId>,
    by_party: HashMap<PartyId, ConnectionId>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection` to `party`. Leaves the registry unchanged on error.
    pub fn bind(&mut self, connection: &ConnectionId, party: &PartyId) -> Result<(), BindError> {
        if self.by_connection.contains_key(connection) || self.by_party.contains_key(party) {
            return Err(BindError::AlreadyBound);
        }
        let _ = self.by_connection.insert(connection.clone(), party.clone());
        let _ = self.by_party.insert(party.clone(), connection.clone());
        Ok(())
    }

    /// Remove the binding of `connection`, returning the freed party.
    pub fn unbind(&mut self, connection: &ConnectionId) -> Option<PartyId> {
        let party = self.by_connection.remove(connection)?;
        let _ = self.by_party.remove(&party);
        Some(party)
    }

    /// Connection currently bound to `party`.
    pub fn connection_of(&self, party: &PartyId) -> Option<&ConnectionId> {
        self.by_party.get(party)
    }

    /// Party currently bound to `connection`.
    pub fn party_of(&self, connection: &ConnectionId) -> Option<&PartyId> {
        self.by_connection.get(connection)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    /// Whether no connection is bound.
    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}
