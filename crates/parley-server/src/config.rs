//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the parley server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `3000`, `0` for auto-assign).
    pub port: u16,
    /// Per-connection outbound queue depth. Payloads beyond it are dropped.
    pub max_send_queue: usize,
    /// Depth of the inbound event queue feeding the dispatcher.
    pub event_queue: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 1024,
            event_queue: 4096,
            max_message_size: 1024 * 1024, // 1 MB
        }
    }
}

impl ServerConfig {
    /// `host:port` string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
