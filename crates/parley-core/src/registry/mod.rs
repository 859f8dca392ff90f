//! In-memory registries owned by [`crate::relay::Relay`].

pub mod connections;
pub mod rooms;

pub use connections::{BindError, ConnectionRegistry};
pub use rooms::RoomRegistry;
