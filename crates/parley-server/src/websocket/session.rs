//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use parley_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::client::ClientRegistry;
use super::dispatcher::RelayEvent;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Run one client connection to completion.
///
/// 1. Registers a send queue and spawns a writer draining it into the socket
/// 2. Forwards text frames (and binary frames that are valid UTF-8) to the
///    dispatcher in arrival order
/// 3. On close, error or shutdown, sends [`RelayEvent::Closed`] and
///    unregisters, which lets the writer flush what is queued and exit
pub async fn run_ws_session(
    ws: WebSocket,
    clients: Arc<ClientRegistry>,
    events: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
) {
    let (connection, send_rx) = clients.register();
    session(ws, connection, send_rx, clients, events, cancel).await;
}

#[instrument(skip_all, fields(connection = %connection))]
async fn session(
    ws: WebSocket,
    connection: ConnectionId,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    clients: Arc<ClientRegistry>,
    events: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer = tokio::spawn(async move {
        while let Some(payload) = send_rx.recv().await {
            if ws_tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
        };
        let event = RelayEvent::Text {
            connection: connection.clone(),
            text,
        };
        if events.send(event).await.is_err() {
            // dispatcher stopped
            break;
        }
    }

    let _ = events
        .send(RelayEvent::Closed {
            connection: connection.clone(),
        })
        .await;
    let age = clients.age(&connection).unwrap_or_default();
    let _ = clients.unregister(&connection);
    let _ = writer.await;

    info!(duration_ms = age.as_millis(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}
