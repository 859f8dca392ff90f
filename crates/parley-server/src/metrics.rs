//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Outbound payloads dropped on a full send queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Accepted subscribe requests (counter).
pub const RELAY_SUBSCRIPTIONS_TOTAL: &str = "relay_subscriptions_total";
/// Relayed messages (counter).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Presence payloads queued (counter).
pub const RELAY_PRESENCE_SENT_TOTAL: &str = "relay_presence_sent_total";
/// Rejected requests (counter, labels: kind).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";
