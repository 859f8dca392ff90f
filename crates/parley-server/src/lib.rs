//! # parley-server
//!
//! Axum HTTP + `WebSocket` transport for the parley relay.
//!
//! - `WebSocket` upgrade on any path; plain requests get a short acknowledgement
//! - One dispatcher task owns the [`parley_core::Relay`] and applies inbound
//!   events strictly one at a time
//! - Per-connection bounded send queues drained by a writer task
//! - `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
