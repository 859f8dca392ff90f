//! Relay error taxonomy.
//!
//! Every variant's `Display` text is the exact string sent to the client in
//! an `{"error": ...}` payload. Errors never escape the relay: they are
//! reported to the originating connection and leave all state untouched.

use thiserror::Error;

use crate::registry::BindError;

/// Broad classification of a [`RelayError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unparseable payload or unknown action.
    Protocol,
    /// Required field missing or empty.
    Validation,
    /// Party identifier already bound elsewhere.
    Conflict,
    /// Unknown room, unknown recipient, or sender not a room member.
    Lookup,
    /// Claimed party does not match the connection's bound party.
    IdentityMismatch,
}

/// A rejected inbound request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Payload is not a JSON object.
    #[error("Error processing message")]
    Malformed,

    /// `action` missing or not one of `subscribe` / `message`.
    #[error("Invalid action")]
    InvalidAction,

    /// Subscribe without a usable `partyId` or `roomId`.
    #[error("Invalid partyId or roomId")]
    InvalidSubscribe,

    /// Message without a usable `partyId`, `roomId`, `toPartyId` or `msg`.
    #[error("Invalid partyId, roomId, toPartyId or msg")]
    InvalidMessage,

    /// The party (or the connection) is already bound.
    #[error("Already subscribed")]
    AlreadySubscribed,

    /// No live connection for `toPartyId`.
    #[error("toPartyId not subscribed")]
    RecipientNotSubscribed,

    /// `roomId` has no members.
    #[error("roomId not found")]
    RoomNotFound,

    /// `partyId` is not a member of `roomId`.
    #[error("partyId not in roomId")]
    NotRoomMember,

    /// `partyId` differs from the party bound to the sending connection.
    #[error("partyId does not match")]
    IdentityMismatch,
}

impl RelayError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed | Self::InvalidAction => ErrorKind::Protocol,
            Self::InvalidSubscribe | Self::InvalidMessage => ErrorKind::Validation,
            Self::AlreadySubscribed => ErrorKind::Conflict,
            Self::RecipientNotSubscribed | Self::RoomNotFound | Self::NotRoomMember => {
                ErrorKind::Lookup
            }
            Self::IdentityMismatch => ErrorKind::IdentityMismatch,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::InvalidAction => "invalid_action",
            Self::InvalidSubscribe => "invalid_subscribe",
            Self::InvalidMessage => "invalid_message",
            Self::AlreadySubscribed => "already_subscribed",
            Self::RecipientNotSubscribed => "recipient_not_subscribed",
            Self::RoomNotFound => "room_not_found",
            Self::NotRoomMember => "not_room_member",
            Self::IdentityMismatch => "identity_mismatch",
        }
    }
}

impl From<BindError> for RelayError {
    fn from(err: BindError) -> Self {
        match err {
            BindError::AlreadyBound => Self::AlreadySubscribed,
        }
    }
}
