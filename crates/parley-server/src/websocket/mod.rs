//! WebSocket connection management and the relay dispatcher.

pub mod client;
pub mod dispatcher;
pub mod session;

pub use client::{ClientRegistry, SendOutcome};
pub use dispatcher::{Dispatcher, RelayEvent, RelayStats};
pub use session::run_ws_session;
