//! The shared routing core, bundled for the HTTP and MCP layers.
//!
//! Everything here is cheap to clone; all clones share one registry, one
//! correlation table and one cache.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::{Provenance, StateCache};
use crate::correlation::{CorrelationTable, DEFAULT_QUERY_TIMEOUT};
use crate::error::BridgeError;
use crate::protocol::{parse_client_timestamp, ClientMessage, ServerMessage};
use crate::reconcile::Reconciler;
use crate::router::CommandRouter;
use crate::session::SessionId;
use crate::transport::{BindingInfo, Connection, ConnectionId, SessionStatus, TransportRegistry};

/// Row of the `/sessions` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub binding: BindingInfo,
    pub has_snapshot: bool,
}

/// What the bridge knows about one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub status: SessionStatus,
    pub snapshot: Option<SnapshotInfo>,
    pub pending_queries: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub captured_at: DateTime<Utc>,
    pub origin: Provenance,
}

#[derive(Clone)]
pub struct Bridge {
    registry: TransportRegistry,
    correlation: CorrelationTable,
    cache: StateCache,
    router: CommandRouter,
    reconciler: Reconciler,
    shutdown: CancellationToken,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TIMEOUT)
    }
}

impl Bridge {
    pub fn new(query_timeout: Duration) -> Self {
        let registry = TransportRegistry::new();
        let correlation = CorrelationTable::new();
        let cache = StateCache::new();
        let router = CommandRouter::new(registry.clone());
        let reconciler = Reconciler::new(router.clone(), correlation.clone(), cache.clone())
            .with_timeout(query_timeout);
        Self {
            registry,
            correlation,
            cache,
            router,
            reconciler,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    pub fn correlation(&self) -> &CorrelationTable {
        &self.correlation
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Cancelled once [`shutdown`](Self::shutdown) runs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Handle one text frame from a client connection.
    pub fn handle_client_message(&self, connection: &Connection, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(connection = %connection.id(), error = %e, "ignoring malformed client message");
                return;
            }
        };

        match message {
            ClientMessage::RegisterSession { session_id } => {
                self.register(connection, session_id);
            }
            ClientMessage::StateResponse { request_id, state } => {
                if !self.correlation.resolve(&request_id, connection.id(), state) {
                    tracing::debug!(request_id = %request_id, connection = %connection.id(), "dropping reply for unknown, settled or misaddressed request");
                }
            }
            ClientMessage::StateError { request_id, error } => {
                if !self
                    .correlation
                    .reject(&request_id, connection.id(), BridgeError::ClientError(error))
                {
                    tracing::debug!(request_id = %request_id, connection = %connection.id(), "dropping error for unknown, settled or misaddressed request");
                }
            }
            ClientMessage::StateUpdate { state, timestamp } => {
                let Some(session) = self.registry.session_for(connection.id()) else {
                    tracing::debug!(connection = %connection.id(), "state update from unregistered connection");
                    return;
                };
                let captured_at = timestamp.as_ref().and_then(parse_client_timestamp);
                match self.reconciler.record_push(&session, state, captured_at) {
                    Ok(_) => tracing::debug!(session = %session, "cached pushed state"),
                    Err(e) => tracing::warn!(session = %session, error = %e, "ignoring state update"),
                }
            }
        }
    }

    fn register(&self, connection: &Connection, session: SessionId) {
        if session.as_str().is_empty() {
            tracing::warn!(connection = %connection.id(), "ignoring registration with empty session id");
            return;
        }

        if let Some(previous) = self.registry.session_for(connection.id()) {
            if previous != session {
                self.cache.evict(&previous);
            }
        }
        // A new client starts from its own scene; whatever the replaced one
        // reported no longer describes it.
        if self
            .registry
            .register(session.clone(), connection.clone())
            .is_some()
        {
            self.cache.evict(&session);
        }

        connection.send_json(&ServerMessage::SessionRegistered { session_id: session });
    }

    /// Tear down after a client socket closes.
    pub fn connection_closed(&self, connection: ConnectionId) {
        if let Some(session) = self.registry.unregister(connection) {
            self.cache.evict(&session);
            tracing::info!(session = %session, connection = %connection, "client disconnected");
        }
        let cancelled = self.correlation.cancel_all_for(connection);
        if cancelled > 0 {
            tracing::info!(connection = %connection, cancelled, "rejected pending state queries");
        }
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.registry
            .list()
            .into_iter()
            .map(|binding| SessionSummary {
                has_snapshot: self.cache.contains(&binding.session_id),
                binding,
            })
            .collect()
    }

    pub fn session_info(&self, session: &SessionId) -> SessionInfo {
        SessionInfo {
            session_id: session.clone(),
            status: self.registry.status(session),
            snapshot: self.cache.get(session).map(|entry| SnapshotInfo {
                captured_at: entry.captured_at,
                origin: entry.origin,
            }),
            pending_queries: self.correlation.pending_for(session),
        }
    }

    /// Reject every pending query, signal all socket loops to close and
    /// forget every session.
    pub fn shutdown(&self) {
        let rejected = self.correlation.reject_all(BridgeError::ShuttingDown);
        self.shutdown.cancel();
        let sessions = self.registry.clear();
        self.cache.clear();
        tracing::info!(rejected, sessions = sessions.len(), "bridge shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn connect(bridge: &Bridge, session: &str) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (conn, mut rx) = bridge.registry().open();
        bridge.handle_client_message(
            &conn,
            &json!({"type": "registerSession", "sessionId": session}).to_string(),
        );
        let ack: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(ack, json!({"type": "sessionRegistered", "sessionId": session}));
        (conn, rx)
    }

    #[test]
    fn register_binds_and_acks() {
        let bridge = Bridge::default();
        let (conn, _rx) = connect(&bridge, "s1");
        assert_eq!(
            bridge.registry().lookup(&SessionId::from("s1")).map(|c| c.id()),
            Some(conn.id())
        );
    }

    #[test]
    fn empty_session_id_is_ignored() {
        let bridge = Bridge::default();
        let (conn, mut rx) = bridge.registry().open();
        bridge.handle_client_message(&conn, r#"{"type":"registerSession","sessionId":""}"#);
        assert!(bridge.registry().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_frames_are_ignored() {
        let bridge = Bridge::default();
        let (conn, _rx) = bridge.registry().open();
        bridge.handle_client_message(&conn, "not json");
        bridge.handle_client_message(&conn, r#"{"type":"mystery"}"#);
        assert!(bridge.registry().is_empty());
    }

    #[test]
    fn state_update_overwrites_cache_as_pushed() {
        let bridge = Bridge::default();
        let (conn, _rx) = connect(&bridge, "s1");
        bridge.handle_client_message(
            &conn,
            &json!({
                "type": "stateUpdate",
                "state": {"model": {"color": "#0000ff"}},
                "timestamp": 1_700_000_000_000i64
            })
            .to_string(),
        );
        let entry = bridge.cache().get(&SessionId::from("s1")).unwrap();
        assert_eq!(entry.origin, Provenance::Pushed);
        assert_eq!(entry.captured_at.timestamp(), 1_700_000_000);
        assert_eq!(entry.snapshot.str_at("/model/color"), Some("#0000ff"));
    }

    #[test]
    fn state_update_from_unregistered_connection_is_dropped() {
        let bridge = Bridge::default();
        let (conn, _rx) = bridge.registry().open();
        bridge.handle_client_message(&conn, r#"{"type":"stateUpdate","state":{}}"#);
        assert!(bridge.cache().is_empty());
    }

    #[test]
    fn state_update_with_missing_state_is_ignored() {
        let bridge = Bridge::default();
        let (conn, _rx) = connect(&bridge, "s1");
        bridge.handle_client_message(&conn, r#"{"type":"stateUpdate"}"#);
        assert!(bridge.cache().is_empty());
    }

    #[test]
    fn stale_reply_is_a_noop() {
        let bridge = Bridge::default();
        let (conn, _rx) = connect(&bridge, "s1");
        bridge.handle_client_message(
            &conn,
            r#"{"type":"stateResponse","requestId":"never-issued","state":{}}"#,
        );
        bridge.handle_client_message(
            &conn,
            r#"{"type":"stateError","requestId":"never-issued","error":"x"}"#,
        );
        assert!(bridge.cache().is_empty());
    }

    #[tokio::test]
    async fn reply_from_another_connection_does_not_settle_query() {
        let bridge = Bridge::new(Duration::from_secs(60));
        let (owner, mut rx) = connect(&bridge, "s1");
        let (stranger, _rx_stranger) = connect(&bridge, "s2");

        let reconciler = bridge.reconciler().clone();
        let query = tokio::spawn(async move {
            reconciler.query_live(&SessionId::from("s1"), true).await
        });
        let request: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let request_id = request["requestId"].clone();

        bridge.handle_client_message(
            &stranger,
            &json!({"type": "stateResponse", "requestId": request_id, "state": {"forged": true}})
                .to_string(),
        );
        bridge.handle_client_message(
            &stranger,
            &json!({"type": "stateError", "requestId": request_id, "error": "forged"}).to_string(),
        );
        assert_eq!(bridge.correlation().pending_for(&SessionId::from("s1")), 1);

        bridge.handle_client_message(
            &owner,
            &json!({"type": "stateResponse", "requestId": request_id, "state": {"genuine": true}})
                .to_string(),
        );
        let reading = query.await.unwrap().unwrap();
        assert_eq!(reading.snapshot.as_value(), &json!({"genuine": true}));
    }

    #[tokio::test]
    async fn close_cascades_to_pending_queries_and_cache() {
        let bridge = Bridge::new(Duration::from_secs(60));
        let (conn, mut rx) = connect(&bridge, "s1");
        let s1 = SessionId::from("s1");
        bridge
            .reconciler()
            .record_push(&s1, json!({"model": {}}), None)
            .unwrap();

        let reconciler = bridge.reconciler().clone();
        let query = tokio::spawn(async move {
            let s1 = SessionId::from("s1");
            tokio::join!(reconciler.query_live(&s1, true), reconciler.query_live(&s1, true))
        });
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(bridge.correlation().pending_for(&s1), 2);

        bridge.connection_closed(conn.id());
        let (a, b) = query.await.unwrap();
        assert_eq!(a.unwrap_err(), BridgeError::TransportLost);
        assert_eq!(b.unwrap_err(), BridgeError::TransportLost);
        assert!(bridge.cache().is_empty());
        assert!(matches!(
            bridge.session_info(&s1).status,
            SessionStatus::Lost { .. }
        ));
    }

    #[test]
    fn superseded_connection_close_keeps_new_binding() {
        let bridge = Bridge::default();
        let (old, _rx_old) = connect(&bridge, "s1");
        let (new, _rx_new) = connect(&bridge, "s1");
        bridge.connection_closed(old.id());
        assert_eq!(
            bridge.registry().lookup(&SessionId::from("s1")).map(|c| c.id()),
            Some(new.id())
        );
    }

    #[test]
    fn rebinding_drops_the_previous_clients_cache() {
        let bridge = Bridge::default();
        let (_old, _rx_old) = connect(&bridge, "s1");
        let s1 = SessionId::from("s1");
        bridge.reconciler().record_push(&s1, json!({}), None).unwrap();
        let (_new, _rx_new) = connect(&bridge, "s1");
        assert!(!bridge.cache().contains(&s1));
    }

    #[test]
    fn sessions_listing_reports_snapshots() {
        let bridge = Bridge::default();
        let (_a, _rx_a) = connect(&bridge, "a");
        let (_b, _rx_b) = connect(&bridge, "b");
        bridge
            .reconciler()
            .record_push(&SessionId::from("b"), json!({}), None)
            .unwrap();

        let rows = serde_json::to_value(bridge.sessions()).unwrap();
        assert_eq!(rows[0]["sessionId"], "a");
        assert_eq!(rows[0]["hasSnapshot"], false);
        assert_eq!(rows[1]["sessionId"], "b");
        assert_eq!(rows[1]["hasSnapshot"], true);
        assert!(rows[1]["boundAt"].is_string());
    }

    #[test]
    fn session_info_serializes_status_inline() {
        let bridge = Bridge::default();
        let info = serde_json::to_value(bridge.session_info(&SessionId::from("nobody"))).unwrap();
        assert_eq!(info["sessionId"], "nobody");
        assert_eq!(info["status"], "unbound");
        assert_eq!(info["snapshot"], Value::Null);
        assert_eq!(info["pendingQueries"], 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_pending_and_clears_everything() {
        let bridge = Bridge::new(Duration::from_secs(60));
        let (_conn, mut rx) = connect(&bridge, "s1");
        let reconciler = bridge.reconciler().clone();
        let query =
            tokio::spawn(async move { reconciler.query_live(&SessionId::from("s1"), true).await });
        rx.recv().await.unwrap();

        let token = bridge.shutdown_token();
        bridge.shutdown();
        assert_eq!(query.await.unwrap().unwrap_err(), BridgeError::ShuttingDown);
        assert!(token.is_cancelled());
        assert!(bridge.registry().is_empty());
        assert!(bridge.cache().is_empty());
    }
}
