use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use relay_core::ids::ConnectionId;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::dispatcher::Dispatcher;

/// Liveness settings for one WebSocket connection.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// A live WebSocket connection, as seen by the fanout.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    last_pong: AtomicU64,
    dropped: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            tx,
            last_pong: AtomicU64::new(now_millis()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a serialized frame without waiting.
    pub fn send(&self, frame: Arc<str>) -> Result<(), mpsc::error::TrySendError<Arc<str>>> {
        let result = self.tx.try_send(frame);
        if matches!(result, Err(mpsc::error::TrySendError::Full(_))) {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_millis(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_millis().saturating_sub(last) < timeout.as_millis() as u64
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Registry of all open WebSocket connections, joined or not.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and return its id + outbound receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections
            .insert(id.clone(), Arc::new(Connection::new(id.clone(), tx)));
        (id, rx)
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// The connection set at this instant. Shard locks are released before
    /// the caller touches any connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

/// Drive one WebSocket until it closes, then run the disconnect path.
///
/// Inbound frames are dispatched one at a time, so a client's actions are
/// handled in the order it sent them. Outbound frames and pings go through a
/// separate writer task. When the writer stops, the reader finishes the frame
/// it is dispatching before it exits, and only then does the disconnect run.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<Arc<str>>,
    dispatcher: Dispatcher,
    heartbeat: Heartbeat,
) {
    let span = tracing::info_span!("connection", connection_id = %connection_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(connection) = dispatcher.connections().get(&connection_id) else {
        return;
    };

    // Writer task: forward queued frames + periodic ping, close on missed pongs
    let writer_conn = Arc::clone(&connection);
    let mut writer = tokio::spawn(
        async move {
            let mut ping_interval = tokio::time::interval(heartbeat.interval);
            ping_interval.tick().await; // consume first immediate tick

            loop {
                tokio::select! {
                    frame = rx.recv() => {
                        let Some(text) = frame else { break };
                        if ws_tx.send(WsMessage::Text(text.as_ref().into())).await.is_err() {
                            break;
                        }
                    }
                    _ = ping_interval.tick() => {
                        if !writer_conn.is_alive(heartbeat.timeout) {
                            tracing::info!("heartbeat timeout, closing");
                            break;
                        }
                        if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                            break;
                        }
                        tracing::trace!("sent ping");
                    }
                }
            }
            let _ = ws_tx.close().await;
        }
        .instrument(span.clone()),
    );

    // Reader task: dispatch frames in receipt order, track pongs.
    // The stop signal is only checked while waiting for the next frame.
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let reader_conn = Arc::clone(&connection);
    let reader_dispatcher = dispatcher.clone();
    let reader_id = connection_id.clone();
    let mut reader = tokio::spawn(
        async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    next = ws_rx.next() => next,
                };
                let Some(Ok(msg)) = next else { break };
                match msg {
                    WsMessage::Text(text) => {
                        reader_dispatcher.handle_frame(&reader_id, text.as_str()).await;
                    }
                    WsMessage::Pong(_) => reader_conn.record_pong(),
                    WsMessage::Close(_) => break,
                    WsMessage::Binary(_) => tracing::debug!("ignoring binary frame"),
                    WsMessage::Ping(_) => {} // axum answers pings itself
                }
            }
        }
        .instrument(span.clone()),
    );

    let writer_done = tokio::select! {
        _ = &mut writer => true,
        _ = &mut reader => false,
    };
    if writer_done {
        let _ = stop_tx.send(true);
        let _ = reader.await;
    } else {
        writer.abort();
    }

    span.in_scope(|| dispatcher.disconnect(&connection_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);
        assert!(id1.as_str().starts_with("conn_"));

        assert!(registry.unregister(&id1));
        assert!(!registry.unregister(&id1));
        assert_eq!(registry.count(), 1);

        assert!(registry.unregister(&id2));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn send_reaches_receiver() {
        let registry = ConnectionRegistry::new(32);
        let (id, mut rx) = registry.register();

        let conn = registry.get(&id).unwrap();
        conn.send(Arc::from("hello")).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let registry = ConnectionRegistry::new(2);
        let (id, _rx) = registry.register();
        let conn = registry.get(&id).unwrap();

        assert!(conn.send(Arc::from("1")).is_ok());
        assert!(conn.send(Arc::from("2")).is_ok());
        assert!(matches!(
            conn.send(Arc::from("3")),
            Err(mpsc::error::TrySendError::Full(_))
        ));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_receiver_is_not_counted_as_drop() {
        let registry = ConnectionRegistry::new(2);
        let (id, rx) = registry.register();
        drop(rx);
        let conn = registry.get(&id).unwrap();
        assert!(matches!(
            conn.send(Arc::from("x")),
            Err(mpsc::error::TrySendError::Closed(_))
        ));
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn snapshot_excludes_removed() {
        let registry = ConnectionRegistry::new(8);
        let (a, _ra) = registry.register();
        let (b, _rb) = registry.register();
        registry.unregister(&a);

        let ids: Vec<ConnectionId> = registry.snapshot().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn pong_tracking() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(ConnectionId::new(), tx);
        assert!(conn.is_alive(Duration::from_secs(90)));

        conn.last_pong.store(0, Ordering::Relaxed);
        assert!(!conn.is_alive(Duration::from_secs(90)));

        conn.record_pong();
        assert!(conn.is_alive(Duration::from_secs(90)));
    }
}
