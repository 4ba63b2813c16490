//! Per-connection handler: subscribe handshake and frame routing.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that drains the connection's outbox. The flow is:
//!   1. Wait for the first `Subscribe` (heartbeats are answered meanwhile)
//!   2. Loop: route `Publish` to the channel, answer heartbeats
//!   3. On exit, drop every subscription the connection held

use std::sync::Arc;

use duelsync_protocol::{Codec, PROTOCOL_VERSION, PlayerId, RelayFrame};
use duelsync_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::RelayError;
use crate::registry::Outbox;
use crate::server::RelayState;

/// Drop guard that removes a connection's subscriptions when the handler
/// exits, panics included.
///
/// `Drop` is synchronous, so the registry lock is taken in a spawned task.
struct ConnectionGuard {
    conn_id: ConnectionId,
    state: Arc<RelayState>,
    writer: JoinHandle<()>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.writer.abort();
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let dropped = state.registry.lock().await.drop_connection(conn_id);
            tracing::debug!(%conn_id, dropped, "connection cleaned up");
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<RelayState>,
) -> Result<(), RelayError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, addr = %conn.peer_addr(), "handling new connection");

    let (outbox, frames) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(Arc::clone(&conn), frames, Arc::clone(&state)));
    let _guard = ConnectionGuard {
        conn_id,
        state: Arc::clone(&state),
        writer,
    };

    let mut identity: Option<PlayerId> = None;
    let handshake_deadline = tokio::time::Instant::now() + state.config.handshake_timeout;

    loop {
        let received = match identity {
            None => tokio::time::timeout_at(handshake_deadline, conn.recv()).await,
            Some(_) => tokio::time::timeout(state.config.heartbeat_timeout, conn.recv()).await,
        };
        let data = match received {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) if identity.is_none() => {
                return Err(RelayError::Handshake(format!(
                    "no Subscribe within {:?}",
                    state.config.handshake_timeout
                )));
            }
            Err(_) => {
                tracing::info!(%conn_id, "connection timed out");
                break;
            }
        };

        let frame: RelayFrame = match state.codec.decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode frame");
                send_error(&outbox, 400, "undecodable frame");
                continue;
            }
        };

        match frame {
            RelayFrame::Subscribe {
                version,
                channel,
                peer,
            } => {
                if version != PROTOCOL_VERSION {
                    send_error(
                        &outbox,
                        400,
                        &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
                    );
                    continue;
                }
                if let Some(known) = identity {
                    if known != peer {
                        send_error(&outbox, 400, &format!("connection already speaks for {known}"));
                        continue;
                    }
                }
                let result = state
                    .registry
                    .lock()
                    .await
                    .subscribe(&channel, peer, conn_id, outbox.clone());
                match result {
                    Ok(peers) => {
                        identity = Some(peer);
                        let _ = outbox.send(RelayFrame::Subscribed { channel, peers });
                    }
                    Err(e) => send_error(&outbox, e.code(), &e.to_string()),
                }
            }

            RelayFrame::Unsubscribe { channel } => {
                state.registry.lock().await.unsubscribe(&channel, conn_id);
            }

            RelayFrame::Publish { channel, data } => {
                let result = state.registry.lock().await.publish(&channel, conn_id, &data);
                if let Err(e) = result {
                    send_error(&outbox, e.code(), &e.to_string());
                }
            }

            RelayFrame::Heartbeat { client_time } => {
                let _ = outbox.send(RelayFrame::HeartbeatAck {
                    client_time,
                    server_time: state.started.elapsed().as_millis() as u64,
                });
            }

            other => {
                tracing::debug!(%conn_id, frame = ?other, "peer sent a relay-only frame");
                send_error(&outbox, 400, "unexpected frame");
            }
        }
    }

    // _guard drops here → subscriptions removed, writer stopped.
    Ok(())
}

/// Drains the outbox onto the socket until either side goes away.
async fn write_frames(
    conn: Arc<WebSocketConnection>,
    mut frames: mpsc::UnboundedReceiver<RelayFrame>,
    state: Arc<RelayState>,
) {
    let conn_id = conn.id();
    while let Some(frame) = frames.recv().await {
        let bytes = match state.codec.encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(%conn_id, error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            tracing::debug!(%conn_id, error = %e, "send failed; writer stopping");
            break;
        }
    }
    let _ = conn.close().await;
}

fn send_error(outbox: &Outbox, code: u16, message: &str) {
    tracing::debug!(code, message, "sending error frame");
    let _ = outbox.send(RelayFrame::Error {
        code,
        message: message.to_string(),
    });
}
