//! Request/response correlation over the message-oriented client channel.
//!
//! A state query embeds a fresh request id in its outgoing message and
//! suspends on a [`PendingReply`]. The matching `stateResponse` or
//! `stateError` completes it; the deadline, transport loss or shutdown
//! complete it with an error. Whichever comes first removes the entry, and
//! every later completion for the same id is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::BridgeError;
use crate::session::SessionId;
use crate::transport::ConnectionId;

/// Default time to wait for a state reply: one WebSocket round trip under
/// normal load, short enough to keep agent-visible latency bounded.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Opaque id of one outstanding query, echoed back by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

type Reply = Result<Value, BridgeError>;

struct PendingEntry {
    session: SessionId,
    connection: ConnectionId,
    tx: oneshot::Sender<Reply>,
}

#[derive(Clone, Default)]
pub struct CorrelationTable {
    inner: Arc<Mutex<HashMap<RequestId, PendingEntry>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding request addressed to `connection`.
    ///
    /// The returned handle carries the id to embed in the query message and
    /// resolves at the latest `timeout` from now.
    pub fn issue(
        &self,
        session: &SessionId,
        connection: ConnectionId,
        timeout: Duration,
    ) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let mut id = RequestId::generate();
        while inner.contains_key(&id) {
            id = RequestId::generate();
        }
        inner.insert(
            id.clone(),
            PendingEntry {
                session: session.clone(),
                connection,
                tx,
            },
        );
        drop(inner);

        tracing::debug!(session = %session, request_id = %id, connection = %connection, "state query issued");
        PendingReply {
            id,
            rx,
            timeout,
            deadline: Instant::now() + timeout,
            table: self.clone(),
        }
    }

    /// Complete `id` with a value sent by `from`. False if the id is unknown,
    /// already settled, or was addressed to another connection.
    pub fn resolve(&self, id: &RequestId, from: ConnectionId, value: Value) -> bool {
        self.complete(id, from, Ok(value))
    }

    /// Complete `id` with an error sent by `from`. Same rules as
    /// [`resolve`](Self::resolve).
    pub fn reject(&self, id: &RequestId, from: ConnectionId, error: BridgeError) -> bool {
        self.complete(id, from, Err(error))
    }

    fn complete(&self, id: &RequestId, from: ConnectionId, reply: Reply) -> bool {
        let entry = {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.get(id) {
                if entry.connection != from {
                    tracing::debug!(request_id = %id, expected = %entry.connection, from = %from, "reply from wrong connection");
                    return false;
                }
            }
            inner.remove(id)
        };
        match entry {
            Some(entry) => {
                // The waiter may have gone away; the entry is settled either way.
                let _ = entry.tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Fail every request addressed to `connection` with
    /// [`BridgeError::TransportLost`]. Returns how many were rejected.
    pub fn cancel_all_for(&self, connection: ConnectionId) -> usize {
        let drained: Vec<(RequestId, PendingEntry)> = {
            let mut inner = self.inner.lock();
            let ids: Vec<RequestId> = inner
                .iter()
                .filter(|(_, e)| e.connection == connection)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.remove(&id).map(|e| (id, e)))
                .collect()
        };
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(session = %entry.session, request_id = %id, "state query cancelled: transport lost");
            let _ = entry.tx.send(Err(BridgeError::TransportLost));
        }
        count
    }

    /// Fail every outstanding request with `error`.
    pub fn reject_all(&self, error: BridgeError) -> usize {
        let drained: Vec<PendingEntry> = self.inner.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding requests on behalf of `session`.
    pub fn pending_for(&self, session: &SessionId) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|e| &e.session == session)
            .count()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.inner.lock().contains_key(id)
    }

    fn discard(&self, id: &RequestId) -> bool {
        self.inner.lock().remove(id).is_some()
    }
}

/// The waiting half of an issued request.
///
/// Dropping it without awaiting removes the entry, so an abandoned query
/// never lingers in the table.
pub struct PendingReply {
    id: RequestId,
    rx: oneshot::Receiver<Reply>,
    timeout: Duration,
    deadline: Instant,
    table: CorrelationTable,
}

impl PendingReply {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Suspend until the reply, an error completion, or the deadline.
    pub async fn wait(mut self) -> Result<Value, BridgeError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BridgeError::TransportLost),
            Err(_) => {
                if self.table.discard(&self.id) {
                    tracing::debug!(request_id = %self.id, "state query timed out");
                    return Err(BridgeError::Timeout(self.timeout));
                }
                // Settled in the same instant the deadline fired.
                match self.rx.try_recv() {
                    Ok(reply) => reply,
                    Err(_) => Err(BridgeError::Timeout(self.timeout)),
                }
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.discard(&self.id);
    }
}
