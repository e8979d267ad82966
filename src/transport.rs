//! Session → connection bindings for visualization clients.
//!
//! A connection names its session with a `registerSession` message; from
//! then on it is reachable by that id alone. At most one connection is bound
//! per session: a later registration replaces the earlier one outright.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::session::SessionId;

/// Process-unique handle for one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a live client connection.
///
/// Frames pushed here are written to the socket in order by the connection's
/// own task. Cloning is cheap; every clone feeds the same socket.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// False once the socket task has dropped its receiver.
    pub fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame. Returns false if the connection is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }

    /// Serialize `message` as JSON and queue it.
    pub fn send_json<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                tracing::error!(connection = %self.id, ?e, "failed to serialize outbound message");
                false
            }
        }
    }
}

/// Lifecycle of a session as seen from the transport side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    /// No connection has ever registered for the id.
    Unbound,
    /// A live connection is bound.
    Bound {
        connection: ConnectionId,
        since: DateTime<Utc>,
    },
    /// The bound connection closed and nothing has replaced it.
    Lost { since: DateTime<Utc> },
}

/// One row of [`TransportRegistry::list`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingInfo {
    pub session_id: SessionId,
    pub connection: ConnectionId,
    pub bound_at: DateTime<Utc>,
}

struct Binding {
    connection: Connection,
    bound_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    bindings: HashMap<SessionId, Binding>,
    /// Reverse pointer so teardown does not have to scan by value.
    by_connection: HashMap<ConnectionId, SessionId>,
    lost: HashMap<SessionId, DateTime<Utc>>,
}

#[derive(Clone, Default)]
pub struct TransportRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    next_id: Arc<AtomicU64>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection handle. The receiver is drained by the socket
    /// task; the connection is not routable until [`register`](Self::register).
    pub fn open(&self) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection { id, tx }, rx)
    }

    /// Bind `connection` to `session`, returning the connection it replaced.
    ///
    /// If the connection was already bound under a different id, that
    /// binding is dropped first so one socket never answers for two sessions.
    pub fn register(&self, session: SessionId, connection: Connection) -> Option<Connection> {
        let mut inner = self.inner.write();
        let conn_id = connection.id();

        if let Some(previous_session) = inner.by_connection.remove(&conn_id) {
            if previous_session != session {
                inner.bindings.remove(&previous_session);
                inner.lost.insert(previous_session, Utc::now());
            }
        }

        let replaced = inner.bindings.insert(
            session.clone(),
            Binding {
                connection,
                bound_at: Utc::now(),
            },
        );
        inner.by_connection.insert(conn_id, session.clone());
        inner.lost.remove(&session);

        let replaced = replaced
            .map(|b| b.connection)
            .filter(|old| old.id() != conn_id);
        if let Some(ref old) = replaced {
            inner.by_connection.remove(&old.id());
            tracing::info!(session = %session, old = %old.id(), new = %conn_id, "session rebound to a new connection");
        } else {
            tracing::info!(session = %session, connection = %conn_id, "session bound");
        }
        replaced
    }

    /// The connection currently bound to `session`, if any.
    pub fn lookup(&self, session: &SessionId) -> Option<Connection> {
        self.inner
            .read()
            .bindings
            .get(session)
            .map(|b| b.connection.clone())
    }

    /// The session `connection` is bound under, if it is still the current
    /// binding for that session.
    pub fn session_for(&self, connection: ConnectionId) -> Option<SessionId> {
        self.inner.read().by_connection.get(&connection).cloned()
    }

    /// Drop whatever binding points at `connection`.
    ///
    /// Returns the session that lost its transport, or `None` when the
    /// connection was never registered or had already been superseded.
    pub fn unregister(&self, connection: ConnectionId) -> Option<SessionId> {
        let mut inner = self.inner.write();
        let session = inner.by_connection.remove(&connection)?;
        let is_current = inner
            .bindings
            .get(&session)
            .is_some_and(|b| b.connection.id() == connection);
        if !is_current {
            return None;
        }
        inner.bindings.remove(&session);
        inner.lost.insert(session.clone(), Utc::now());
        Some(session)
    }

    /// Every bound connection. Used only by the degraded broadcast path.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner
            .read()
            .bindings
            .values()
            .map(|b| b.connection.clone())
            .collect()
    }

    pub fn status(&self, session: &SessionId) -> SessionStatus {
        let inner = self.inner.read();
        if let Some(binding) = inner.bindings.get(session) {
            return SessionStatus::Bound {
                connection: binding.connection.id(),
                since: binding.bound_at,
            };
        }
        match inner.lost.get(session) {
            Some(since) => SessionStatus::Lost { since: *since },
            None => SessionStatus::Unbound,
        }
    }

    pub fn list(&self) -> Vec<BindingInfo> {
        let inner = self.inner.read();
        let mut rows: Vec<BindingInfo> = inner
            .bindings
            .iter()
            .map(|(session, b)| BindingInfo {
                session_id: session.clone(),
                connection: b.connection.id(),
                bound_at: b.bound_at,
            })
            .collect();
        rows.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        rows
    }

    pub fn len(&self) -> usize {
        self.inner.read().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every binding. Returns the sessions that were bound.
    pub fn clear(&self) -> Vec<SessionId> {
        let mut inner = self.inner.write();
        inner.by_connection.clear();
        inner.lost.clear();
        inner.bindings.drain().map(|(session, _)| session).collect()
    }
}
