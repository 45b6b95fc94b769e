use crate::metrics;
use crate::models::Role;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

pub mod message_types;
pub mod session;

pub use message_types::{ClientFrame, InboundMessage, ServerFrame};

/// Unique identifier for one physical connection
///
/// A user reconnecting gets a new id, so late events from the replaced
/// socket can be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands consumed by the transport behind a connection
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Serialized frame to write as a text message
    Frame(String),
    /// Liveness probe (WebSocket ping)
    Probe,
    Close,
}

/// Write side of a connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: UnboundedSender<SessionCommand>,
}

impl ConnectionHandle {
    /// Creates a handle plus the receiver the transport drains
    pub fn channel() -> (Self, UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The transport is open as long as it still drains the channel
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match frame.to_json() {
            Ok(json) => self.tx.send(SessionCommand::Frame(json)).is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound frame");
                false
            }
        }
    }

    pub fn probe(&self) -> bool {
        self.tx.send(SessionCommand::Probe).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(SessionCommand::Close);
    }
}

/// A live, registered connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub user_id: Uuid,
    pub role: Role,
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
    last_heartbeat_ms: Arc<AtomicI64>,
}

impl Connection {
    fn new(user_id: Uuid, role: Role, handle: ConnectionHandle) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            role,
            handle,
            connected_at: now,
            last_heartbeat_ms: Arc::new(AtomicI64::new(now.timestamp_millis())),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn last_heartbeat_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_heartbeat_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.connected_at)
    }

    fn record_heartbeat(&self) {
        self.last_heartbeat_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

struct Entry {
    connection: Connection,
    heartbeat: JoinHandle<()>,
}

type Connections = RwLock<HashMap<Uuid, Entry>>;

/// Process-wide registry of live connections, at most one per user
///
/// All mutations take the write lock, so a register racing a remove for the
/// same user always leaves exactly one or zero entries behind.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Connections>,
    heartbeat_interval: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ConnectionRegistry {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            heartbeat_interval,
        }
    }

    /// Register a connection for `user_id`, replacing (and closing) any
    /// existing one, then acknowledge with a `connected` frame.
    pub async fn register(&self, user_id: Uuid, role: Role, handle: ConnectionHandle) -> Connection {
        let connection = Connection::new(user_id, role, handle);

        let live = {
            let mut guard = self.inner.write().await;

            if let Some(previous) = guard.remove(&user_id) {
                previous.heartbeat.abort();
                previous.connection.handle.close();
                tracing::info!(
                    user_id = %user_id,
                    "replaced existing connection with a newer one"
                );
            }

            let heartbeat = self.spawn_heartbeat(connection.clone());
            guard.insert(
                user_id,
                Entry {
                    connection: connection.clone(),
                    heartbeat,
                },
            );
            guard.len()
        };
        metrics::set_live_connections(live);

        connection
            .handle
            .send_frame(&ServerFrame::connected(user_id, role));

        tracing::info!(user_id = %user_id, role = %role, "connection registered");
        connection
    }

    pub async fn get(&self, user_id: Uuid) -> Option<Connection> {
        let guard = self.inner.read().await;
        guard.get(&user_id).map(|e| e.connection.clone())
    }

    /// Close and forget the user's connection. Idempotent.
    pub async fn remove(&self, user_id: Uuid) -> bool {
        self.detach(user_id, None, true).await
    }

    /// Remove only if `connection_id` is still the user's live connection.
    ///
    /// Used by transports on close so a replaced socket cannot evict its
    /// successor.
    pub async fn remove_if_current(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        self.detach(user_id, Some(connection_id), true).await
    }

    async fn detach(
        &self,
        user_id: Uuid,
        connection_id: Option<ConnectionId>,
        abort_heartbeat: bool,
    ) -> bool {
        let (removed, live) = {
            let mut guard = self.inner.write().await;
            let matches = match (guard.get(&user_id), connection_id) {
                (Some(entry), Some(id)) => entry.connection.id() == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            let removed = if matches { guard.remove(&user_id) } else { None };
            (removed, guard.len())
        };

        match removed {
            Some(entry) => {
                if abort_heartbeat {
                    entry.heartbeat.abort();
                }
                entry.connection.handle.close();
                metrics::set_live_connections(live);
                tracing::info!(user_id = %user_id, "connection removed");
                true
            }
            None => false,
        }
    }

    /// Deliver a frame to the user's live connection.
    ///
    /// Returns `false` when the user has no open connection.
    pub async fn send_to(&self, user_id: Uuid, frame: &ServerFrame) -> bool {
        let connection = match self.get(user_id).await {
            Some(c) => c,
            None => return false,
        };

        if connection.handle.send_frame(frame) {
            return true;
        }

        // Transport is gone; the heartbeat would find out within one interval.
        self.detach(user_id, Some(connection.id()), true).await;
        false
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(&user_id)
            .map(|e| e.connection.handle.is_open())
            .unwrap_or(false)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Close every connection (graceful shutdown)
    pub async fn close_all(&self) {
        let drained: Vec<Entry> = {
            let mut guard = self.inner.write().await;
            guard.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.heartbeat.abort();
            entry.connection.handle.close();
        }
        metrics::set_live_connections(0);
        tracing::info!(closed = drained.len(), "closed all connections");
    }

    fn spawn_heartbeat(&self, connection: Connection) -> JoinHandle<()> {
        let registry = Arc::downgrade(&self.inner);
        let period = self.heartbeat_interval;
        let heartbeat_interval = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if connection.handle.is_open() && connection.handle.probe() {
                    connection.record_heartbeat();
                    tracing::debug!(user_id = %connection.user_id, "liveness probe sent");
                    continue;
                }

                tracing::info!(
                    user_id = %connection.user_id,
                    "transport closed, dropping connection"
                );
                if let Some(inner) = Weak::upgrade(&registry) {
                    let registry = ConnectionRegistry {
                        inner,
                        heartbeat_interval,
                    };
                    // This task is finishing on its own; do not abort it mid-cleanup.
                    registry
                        .detach(connection.user_id, Some(connection.id()), false)
                        .await;
                }
                break;
            }
        })
    }
}
