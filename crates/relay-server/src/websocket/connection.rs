//! Live tutor connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::{ConnectionId, Uid};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Outbound frame written to the tutor socket.
#[derive(Serialize)]
struct OutboundFrame<'a> {
    event: &'a str,
    data: &'a Value,
}

/// A tutor's WebSocket, as seen by the rest of the instance.
///
/// Pushes go through a bounded queue drained by the session's writer task;
/// a push fails when the queue is full or the writer has gone away.
pub struct LiveConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Tutor this connection belongs to.
    pub uid: Uid,
    /// Send channel to the socket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Cancelled when the connection should close.
    close: CancellationToken,
    /// When this connection was established.
    connected_at: Instant,
    /// Whether the client has shown activity since the last ping.
    is_alive: AtomicBool,
    /// When the last pong (or any inbound frame) was received.
    last_pong: Mutex<Instant>,
    /// Count of frames dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl LiveConnection {
    /// Create a connection for `uid` writing into `tx`.
    pub fn new(uid: Uid, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            uid,
            tx,
            close: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a raw text frame.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue `{"event": event, "data": data}`.
    pub fn emit(&self, event: &str, data: &Value) -> bool {
        match serde_json::to_string(&OutboundFrame { event, data }) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Ask the session to close the socket. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether [`LiveConnection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once the connection is asked to close.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or other frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_connection(capacity: usize) -> (LiveConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = LiveConnection::new(Uid::parse("t1").unwrap(), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.uid.as_str(), "t1");
        assert!(conn.id.as_str().starts_with("conn_"));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn emit_writes_event_frame() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.emit("message", &json!({"n": 1})));
        let frame = rx.recv().await.unwrap();
        insta::assert_snapshot!(frame.as_str(), @r#"{"event":"message","data":{"n":1}}"#);
    }

    #[tokio::test]
    async fn send_to_full_queue_fails() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("a".into())));
        assert!(!conn.send(Arc::new("b".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_closed_queue_fails() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.emit("message", &Value::Null));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_resolves_waiters() {
        let (conn, _rx) = make_connection(4);
        conn.close();
        conn.close();
        conn.closed().await;
        assert!(conn.is_closed());
    }

    #[test]
    fn heartbeat_flag() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
        assert!(conn.last_pong_elapsed() < Duration::from_secs(1));
    }
}
