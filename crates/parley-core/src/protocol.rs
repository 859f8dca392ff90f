//! Wire protocol: one JSON object per text frame.
//!
//! Inbound requests carry an `action` of `subscribe` or `message`. Outbound
//! payloads are either an `{"error": ...}` notice or an event tagged with
//! `action` (`presence` / `message`). Application `msg` bodies are kept as
//! [`RawValue`] so they are forwarded byte-for-byte.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use serde_json::value::RawValue;
use tracing::warn;

use crate::errors::RelayError;
use crate::ids::{PartyId, RoomId};

/// A validated inbound request.
#[derive(Debug)]
pub enum Request {
    /// Bind the connection to `party_id` and join `room_id`.
    Subscribe {
        /// Party claimed by the connection.
        party_id: PartyId,
        /// Room to join.
        room_id: RoomId,
    },
    /// Relay `msg` from `party_id` to `to_party_id`.
    Message {
        /// Claimed sender.
        party_id: PartyId,
        /// Room the sender claims to be in.
        room_id: RoomId,
        /// Recipient.
        to_party_id: PartyId,
        /// Opaque application payload, untouched.
        msg: Box<RawValue>,
    },
}

impl Request {
    /// Parse and validate a raw text payload.
    ///
    /// Invalid JSON and a top-level `null` are [`RelayError::Malformed`].
    /// Any other non-object has no `action` and is
    /// [`RelayError::InvalidAction`]. Field checks mirror the wire contract:
    /// identifiers must be non-empty strings and `msg` must be present and
    /// truthy (not `null`, `false`, `0` or `""`).
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let fields = match serde_json::from_str::<HashMap<String, Box<RawValue>>>(raw) {
            Ok(fields) => Fields(fields),
            Err(_) => return Err(classify_non_object(raw)),
        };

        match fields.text("action").as_deref() {
            Some("subscribe") => {
                let (Some(party_id), Some(room_id)) = (fields.text("partyId"), fields.text("roomId"))
                else {
                    return Err(RelayError::InvalidSubscribe);
                };
                Ok(Self::Subscribe {
                    party_id: PartyId::from_raw(party_id),
                    room_id: RoomId::from_raw(room_id),
                })
            }
            Some("message") => {
                let (Some(party_id), Some(room_id), Some(to_party_id), Some(msg)) = (
                    fields.text("partyId"),
                    fields.text("roomId"),
                    fields.text("toPartyId"),
                    fields.payload("msg"),
                ) else {
                    return Err(RelayError::InvalidMessage);
                };
                Ok(Self::Message {
                    party_id: PartyId::from_raw(party_id),
                    room_id: RoomId::from_raw(room_id),
                    to_party_id: PartyId::from_raw(to_party_id),
                    msg,
                })
            }
            _ => Err(RelayError::InvalidAction),
        }
    }

    /// The `action` this request was parsed from.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Message { .. } => "message",
        }
    }
}

/// Error for a payload that did not parse as an object.
fn classify_non_object(raw: &str) -> RelayError {
    match serde_json::from_str::<&RawValue>(raw) {
        Ok(value) if value.get().trim() != "null" => RelayError::InvalidAction,
        _ => RelayError::Malformed,
    }
}

/// Top-level fields of an inbound object, values unparsed.
struct Fields(HashMap<String, Box<RawValue>>);

impl Fields {
    /// Non-empty string value of `name`.
    fn text(&self, name: &str) -> Option<String> {
        let raw = self.0.get(name)?;
        serde_json::from_str::<String>(raw.get())
            .ok()
            .filter(|s| !s.is_empty())
    }

    /// Truthy raw value of `name`.
    fn payload(&self, name: &str) -> Option<Box<RawValue>> {
        self.0.get(name).filter(|raw| is_truthy(raw)).cloned()
    }
}

fn is_truthy(raw: &RawValue) -> bool {
    match serde_json::from_str::<Value>(raw.get()) {
        Ok(Value::Null | Value::Bool(false)) => false,
        Ok(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Ok(Value::String(s)) => !s.is_empty(),
        // out-of-range numbers such as 1e400 read as infinity
        Ok(_) | Err(_) => true,
    }
}

/// `{"error": "..."}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorNotice {
    /// Human-readable reason; one of the [`RelayError`] strings.
    pub error: String,
}

impl From<&RelayError> for ErrorNotice {
    fn from(err: &RelayError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// Online/offline change of one party.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    /// Party whose state changed.
    pub from_party_id: PartyId,
    /// Room the party is in.
    pub room_id: RoomId,
    /// New state.
    pub online: bool,
}

/// A relayed application message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessage {
    /// Verified sender.
    pub from_party_id: PartyId,
    /// Room named by the sender.
    pub room_id: RoomId,
    /// Payload as received.
    pub msg: Box<RawValue>,
}

/// Outbound event, tagged by `action`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Event {
    /// `{"action":"presence",...}`
    Presence(PresenceNotice),
    /// `{"action":"message",...}`
    Message(RelayedMessage),
}

/// Serialize an outbound payload for delivery.
///
/// Returns `None` (and logs) if serialization fails, which the payload
/// types above cannot trigger.
pub fn encode(payload: &impl Serialize) -> Option<Arc<String>> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound payload");
            None
        }
    }
}
