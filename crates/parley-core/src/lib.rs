//! # parley-core
//!
//! Session and room state machine for the parley presence/relay service.
//!
//! - [`registry::ConnectionRegistry`]: connection ↔ party bindings
//! - [`registry::RoomRegistry`]: room membership (one room per party)
//! - [`presence`]: online/offline fan-out to room peers
//! - [`relay::Relay`]: parses inbound payloads, validates them and dispatches
//! - [`outbox::Outbox`]: the only way payloads leave the core
//!
//! Nothing in this crate performs I/O. The transport owns connections and
//! feeds events into [`relay::Relay`] one at a time.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod outbox;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod relay;

pub use errors::{ErrorKind, RelayError};
pub use ids::{ConnectionId, PartyId, RoomId};
pub use outbox::{Delivery, Mailbox, Outbox};
pub use relay::{Handled, Relay};
