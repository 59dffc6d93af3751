//! Tutor WebSocket session, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_pubsub::Relay;
use relay_settings::ConnectionSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::connection::LiveConnection;
use crate::bridge::ConnectionBridge;
use crate::metrics as names;
use crate::registry::{TutorProfile, TutorRegistry};

/// How long the writer gets to flush queued frames after close.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared collaborators every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Instance relay.
    pub relay: Arc<Relay>,
    /// Instance registry.
    pub registry: Arc<TutorRegistry>,
    /// Queue and heartbeat limits.
    pub limits: ConnectionSettings,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Run a tutor session on an upgraded socket.
///
/// 1. Activates the connection bridge (registry entry, handlers, subscription)
/// 2. Forwards queued frames to the socket and pings on the heartbeat interval
/// 3. Reads until the client leaves, goes silent, is closed, or the server stops
/// 4. Deactivates the bridge
#[instrument(skip_all, fields(uid = %profile.uid))]
pub async fn run_tutor_session(mut socket: WebSocket, profile: TutorProfile, ctx: SessionContext) {
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.limits.send_queue);
    let connection = Arc::new(LiveConnection::new(profile.uid.clone(), send_tx));
    let bridge = ConnectionBridge::new(
        Arc::clone(&ctx.relay),
        Arc::clone(&ctx.registry),
        profile,
        Arc::clone(&connection),
    );

    if let Err(e) = bridge.activate().await {
        warn!(connection_id = %connection.id, error = %e, "activation failed, closing socket");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AGAIN,
                reason: Utf8Bytes::from_static("relay unavailable"),
            })))
            .await;
        return;
    }

    info!(connection_id = %connection.id, "tutor connected");
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        ctx.limits.clone(),
    ));

    loop {
        tokio::select! {
            () = connection.closed() => {
                debug!("connection closed by relay");
                break;
            }
            () = ctx.shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Close(_))) => {
                    debug!("client sent close frame");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(_)) => {
                    connection.mark_alive();
                    trace!("ignoring inbound frame");
                }
                Some(Err(e)) => {
                    debug!(error = %e, "socket read error");
                    break;
                }
                None => break,
            }
        }
    }

    bridge.deactivate().await;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    info!(
        connection_id = %connection.id,
        dropped = connection.drop_count(),
        age_secs = connection.age().as_secs(),
        "tutor disconnected"
    );
    counter!(names::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(names::WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Drain the send queue into the socket, pinging on the heartbeat interval.
///
/// Queued frames take priority over close so a final message pushed just
/// before close is still written. Ends with a Close frame.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<LiveConnection>,
    limits: ConnectionSettings,
) {
    let mut ping_interval = tokio::time::interval(limits.heartbeat_interval());
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                    connection.close();
                    return;
                }
            }
            () = connection.closed() => break,
            _ = ping_interval.tick() => {
                if !connection.check_alive()
                    && connection.last_pong_elapsed() > limits.heartbeat_timeout()
                {
                    warn!(timeout = ?limits.heartbeat_timeout(), "tutor unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    connection.close();
                    return;
                }
            }
        }
    }

    connection.close();
    while let Ok(text) = send_rx.try_recv() {
        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
            return;
        }
    }
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static(""),
        })))
        .await;
}
