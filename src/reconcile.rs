//! Cache-or-query decisions for reading client state.
//!
//! | `force_refresh` | cached? | behavior                                       |
//! |-----------------|---------|------------------------------------------------|
//! | false           | yes     | return cache, no network traffic               |
//! | false           | no      | query live                                     |
//! | true            | any     | query live; on failure fall back to cache      |
//!
//! A live failure with nothing cached is returned as an error. Client-side
//! edits made by a human are never pushed, so a cached value can lag the
//! scene until the next forced refresh. Polling is deliberately absent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::cache::{CachedState, Provenance, Snapshot, StateCache};
use crate::correlation::{CorrelationTable, DEFAULT_QUERY_TIMEOUT};
use crate::error::BridgeError;
use crate::protocol::ServerMessage;
use crate::router::CommandRouter;
use crate::session::SessionId;

/// A snapshot handed to the tool layer, with everything it needs to say
/// how far the value can be trusted.
#[derive(Debug, Clone)]
pub struct StateReading {
    pub snapshot: Arc<Snapshot>,
    /// [`Provenance::Fresh`] for a live round trip, [`Provenance::Cache`]
    /// when served from the cache.
    pub source: Provenance,
    /// How the underlying cache entry was produced.
    pub origin: Provenance,
    pub captured_at: DateTime<Utc>,
    /// Human-readable staleness warning, present whenever `source` is cache.
    pub caveat: Option<String>,
}

impl StateReading {
    fn fresh(entry: CachedState) -> Self {
        Self {
            snapshot: entry.snapshot,
            source: Provenance::Fresh,
            origin: entry.origin,
            captured_at: entry.captured_at,
            caveat: None,
        }
    }

    fn cached(entry: CachedState, failure: Option<&BridgeError>) -> Self {
        let at = format_timestamp(&entry.captured_at);
        let caveat = match (failure, entry.origin) {
            (Some(err), _) => format!(
                "live query failed ({err}); using cached state from {at}, which may be stale"
            ),
            (None, Provenance::Pushed) => format!(
                "cached from the browser's last update at {at}; manual changes made in the browser since then are not reflected, use force_refresh=true to re-query"
            ),
            (None, _) => format!(
                "cached from a query at {at}; the scene may have been changed manually since, use force_refresh=true to re-query"
            ),
        };
        Self {
            snapshot: entry.snapshot,
            source: Provenance::Cache,
            origin: entry.origin,
            captured_at: entry.captured_at,
            caveat: Some(caveat),
        }
    }

    /// `"<label>: <value> (queried at <ISO-8601>, source: <source>[, note])"`
    pub fn annotate(&self, label: &str, value: &str) -> String {
        let mut out = format!(
            "{label}: {value} (queried at {}, source: {}",
            format_timestamp(&self.captured_at),
            self.source
        );
        if let Some(ref caveat) = self.caveat {
            out.push_str(", ");
            out.push_str(caveat);
        }
        out.push(')');
        out
    }

    /// Short provenance phrase for responses to relative edits.
    pub fn basis(&self) -> String {
        match self.caveat {
            Some(ref caveat) => format!(
                "based on {} state captured at {} ({caveat})",
                self.source,
                format_timestamp(&self.captured_at)
            ),
            None => format!(
                "based on {} state captured at {}",
                self.source,
                format_timestamp(&self.captured_at)
            ),
        }
    }
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct Reconciler {
    router: CommandRouter,
    correlation: CorrelationTable,
    cache: StateCache,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(router: CommandRouter, correlation: CorrelationTable, cache: StateCache) -> Self {
        Self {
            router,
            correlation,
            cache,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the session's state, from cache or by a live round trip.
    pub async fn get_state(
        &self,
        session: &SessionId,
        force_refresh: bool,
    ) -> Result<StateReading, BridgeError> {
        if !force_refresh {
            if let Some(entry) = self.cache.get(session) {
                return Ok(StateReading::cached(entry, None));
            }
        }

        match self.query_live(session, force_refresh).await {
            Ok(reading) => Ok(reading),
            Err(err) => match self.cache.get(session) {
                Some(entry) => {
                    tracing::warn!(session = %session, error = %err, "live state query failed, serving cache");
                    Ok(StateReading::cached(entry, Some(&err)))
                }
                None => Err(err),
            },
        }
    }

    /// Ask the client for its full state and wait for the reply.
    ///
    /// Fails immediately with [`BridgeError::NoRoute`] when no client is
    /// connected; no request is registered in that case.
    pub async fn query_live(
        &self,
        session: &SessionId,
        force_refresh: bool,
    ) -> Result<StateReading, BridgeError> {
        let connection = self
            .router
            .route(session)
            .ok_or_else(|| BridgeError::NoRoute(session.clone()))?;

        let pending = self.correlation.issue(session, connection.id(), self.timeout);
        let request = ServerMessage::RequestState {
            request_id: pending.id().clone(),
            force_refresh,
        };
        if !connection.send_json(&request) {
            return Err(BridgeError::TransportLost);
        }

        let value = pending.wait().await?;
        let snapshot = Arc::new(Snapshot::from_value(value)?);
        let captured_at = Utc::now();

        // The connection may have closed or been replaced while we waited;
        // only a still-current binding gets its cache refreshed.
        let still_bound = self
            .router
            .route(session)
            .is_some_and(|c| c.id() == connection.id());
        let entry = if still_bound {
            self.cache
                .store(session, snapshot, Provenance::Fresh, captured_at)
        } else {
            CachedState {
                snapshot,
                captured_at,
                origin: Provenance::Fresh,
            }
        };
        Ok(StateReading::fresh(entry))
    }

    /// Record an unsolicited full-state push from the client.
    pub fn record_push(
        &self,
        session: &SessionId,
        state: Value,
        captured_at: Option<DateTime<Utc>>,
    ) -> Result<CachedState, BridgeError> {
        let snapshot = Arc::new(Snapshot::from_value(state)?);
        Ok(self.cache.store(
            session,
            snapshot,
            Provenance::Pushed,
            captured_at.unwrap_or_else(Utc::now),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;
    use crate::transport::{ConnectionId, TransportRegistry};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        registry: TransportRegistry,
        correlation: CorrelationTable,
        cache: StateCache,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let registry = TransportRegistry::new();
        let correlation = CorrelationTable::new();
        let cache = StateCache::new();
        let reconciler = Reconciler::new(
            CommandRouter::new(registry.clone()),
            correlation.clone(),
            cache.clone(),
        );
        Harness {
            registry,
            correlation,
            cache,
            reconciler,
        }
    }

    impl Harness {
        fn connect(&self, session: &str) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
            let (conn, rx) = self.registry.open();
            let id = conn.id();
            self.registry.register(SessionId::from(session), conn);
            (id, rx)
        }

        fn seed(&self, session: &str, state: Value) -> Arc<Snapshot> {
            let snap = Arc::new(Snapshot::from_value(state).unwrap());
            self.cache
                .store(&SessionId::from(session), snap.clone(), Provenance::Fresh, Utc::now());
            snap
        }
    }

    /// Answer the next `requestState` frame on `rx` with `state`.
    fn answer_next(
        correlation: CorrelationTable,
        from: ConnectionId,
        mut rx: mpsc::UnboundedReceiver<String>,
        state: Value,
    ) -> tokio::task::JoinHandle<mpsc::UnboundedReceiver<String>> {
        tokio::spawn(async move {
            let frame = rx.recv().await.expect("requestState frame");
            let msg: Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(msg["type"], "requestState");
            let id = msg["requestId"].as_str().unwrap();
            assert!(correlation.resolve(&id.into(), from, state));
            rx
        })
    }

    #[tokio::test]
    async fn cache_hit_sends_nothing_and_returns_same_object() {
        let h = harness();
        let (_, mut rx) = h.connect("s1");
        let seeded = h.seed("s1", json!({"model": {"color": "#ff0000"}}));

        let s1 = SessionId::from("s1");
        let first = h.reconciler.get_state(&s1, false).await.unwrap();
        let second = h.reconciler.get_state(&s1, false).await.unwrap();

        assert!(Arc::ptr_eq(&first.snapshot, &seeded));
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert_eq!(first.source, Provenance::Cache);
        assert!(first.caveat.is_some());
        assert!(rx.try_recv().is_err(), "no frames on the wire");
    }

    #[tokio::test]
    async fn force_refresh_round_trips_and_overwrites_cache() {
        let h = harness();
        let (conn, rx) = h.connect("s1");
        h.seed("s1", json!({"model": {"color": "#ff0000"}}));

        let responder = answer_next(h.correlation.clone(), conn, rx, json!({"model": {"color": "#00ff00"}}));
        let s1 = SessionId::from("s1");
        let reading = h.reconciler.get_state(&s1, true).await.unwrap();
        let mut rx = responder.await.unwrap();

        assert_eq!(reading.source, Provenance::Fresh);
        assert!(reading.caveat.is_none());
        assert_eq!(reading.snapshot.str_at("/model/color"), Some("#00ff00"));
        assert_eq!(
            h.cache.get(&s1).unwrap().snapshot.str_at("/model/color"),
            Some("#00ff00")
        );
        assert!(rx.try_recv().is_err(), "exactly one query");
    }

    #[tokio::test]
    async fn cache_miss_queries_live() {
        let h = harness();
        let (conn, rx) = h.connect("s1");
        let responder = answer_next(h.correlation.clone(), conn, rx, json!({"camera": {"fov": 45}}));

        let reading = h
            .reconciler
            .get_state(&SessionId::from("s1"), false)
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(reading.source, Provenance::Fresh);
        assert_eq!(reading.snapshot.f64_at("/camera/fov"), Some(45.0));
    }

    #[tokio::test]
    async fn no_route_without_cache_fails_fast() {
        let h = harness();
        let err = h
            .reconciler
            .get_state(&SessionId::from("s3"), true)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::NoRoute(SessionId::from("s3")));
        assert!(err.to_string().contains("not connected"));
        assert!(h.correlation.is_empty(), "no request registered");
    }

    #[tokio::test]
    async fn no_route_with_cache_falls_back() {
        let h = harness();
        let seeded = h.seed("s1", json!({"model": {"color": "#123456"}}));
        let reading = h
            .reconciler
            .get_state(&SessionId::from("s1"), true)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&reading.snapshot, &seeded));
        assert_eq!(reading.source, Provenance::Cache);
        assert!(reading.caveat.unwrap().contains("live query failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_cache() {
        let h = harness();
        let (_, _rx) = h.connect("s1");
        let seeded = h.seed("s1", json!({"model": {"color": "#ff0000"}}));

        let reading = h
            .reconciler
            .get_state(&SessionId::from("s1"), true)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&reading.snapshot, &seeded));
        assert_eq!(reading.source, Provenance::Cache);
        assert!(reading.caveat.unwrap().contains("timed out"));
        assert!(h.correlation.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_cache_is_an_error() {
        let h = harness();
        let (_, _rx) = h.connect("s1");
        let err = h
            .reconciler
            .get_state(&SessionId::from("s1"), true)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::Timeout(DEFAULT_QUERY_TIMEOUT));
    }

    #[tokio::test]
    async fn transport_loss_rejects_without_waiting_for_timeout() {
        let h = harness();
        let (conn_id, mut rx) = h.connect("s1");
        let reconciler = h.reconciler.clone().with_timeout(Duration::from_secs(60));

        let correlation = h.correlation.clone();
        let registry = h.registry.clone();
        tokio::spawn(async move {
            rx.recv().await.expect("requestState frame");
            registry.unregister(conn_id);
            correlation.cancel_all_for(conn_id);
        });

        let started = std::time::Instant::now();
        let err = reconciler
            .get_state(&SessionId::from("s1"), true)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::TransportLost);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn explicit_error_reply_is_surfaced() {
        let h = harness();
        let (conn, mut rx) = h.connect("s1");
        let correlation = h.correlation.clone();
        tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let msg: Value = serde_json::from_str(&frame).unwrap();
            let id = msg["requestId"].as_str().unwrap();
            correlation.reject(&id.into(), conn, BridgeError::ClientError("renderer busy".into()));
        });

        let err = h
            .reconciler
            .get_state(&SessionId::from("s1"), false)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::ClientError("renderer busy".into()));
    }

    #[tokio::test]
    async fn non_object_reply_is_not_cached() {
        let h = harness();
        let (conn, rx) = h.connect("s1");
        let responder = answer_next(h.correlation.clone(), conn, rx, json!("nope"));
        let err = h
            .reconciler
            .get_state(&SessionId::from("s1"), true)
            .await
            .unwrap_err();
        responder.await.unwrap();
        assert!(matches!(err, BridgeError::InvalidSnapshot(_)));
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_forced_queries_are_correlated_independently() {
        let h = harness();
        let (conn, mut rx) = h.connect("s1");
        let correlation = h.correlation.clone();
        tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..2 {
                let frame = rx.recv().await.unwrap();
                let msg: Value = serde_json::from_str(&frame).unwrap();
                ids.push(msg["requestId"].as_str().unwrap().to_string());
            }
            assert_ne!(ids[0], ids[1]);
            // Answer in reverse order.
            correlation.resolve(&ids[1].as_str().into(), conn, json!({"n": 2}));
            correlation.resolve(&ids[0].as_str().into(), conn, json!({"n": 1}));
        });

        let s1 = SessionId::from("s1");
        let (a, b) = tokio::join!(
            h.reconciler.get_state(&s1, true),
            h.reconciler.get_state(&s1, true)
        );
        let mut ns = vec![
            a.unwrap().snapshot.f64_at("/n").unwrap(),
            b.unwrap().snapshot.f64_at("/n").unwrap(),
        ];
        ns.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(ns, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn push_overwrites_cache_and_serves_fast_path() {
        let h = harness();
        let (_, mut rx) = h.connect("s1");
        h.seed("s1", json!({"model": {"color": "#ff0000"}}));
        let s1 = SessionId::from("s1");

        h.reconciler
            .record_push(&s1, json!({"model": {"color": "#0000ff"}}), None)
            .unwrap();
        let reading = h.reconciler.get_state(&s1, false).await.unwrap();
        assert_eq!(reading.snapshot.str_at("/model/color"), Some("#0000ff"));
        assert_eq!(reading.source, Provenance::Cache);
        assert_eq!(reading.origin, Provenance::Pushed);
        assert!(reading.caveat.unwrap().contains("manual changes"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn push_rejects_partial_payload() {
        let h = harness();
        assert!(h
            .reconciler
            .record_push(&SessionId::from("s1"), Value::Null, None)
            .is_err());
        assert!(h.cache.is_empty());
    }

    #[test]
    fn annotate_uses_fixed_convention() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let reading = StateReading {
            snapshot: Arc::new(Snapshot::from_value(json!({})).unwrap()),
            source: Provenance::Fresh,
            origin: Provenance::Fresh,
            captured_at: at,
            caveat: None,
        };
        assert_eq!(
            reading.annotate("Model color", "#ff0000"),
            "Model color: #ff0000 (queried at 2024-05-01T12:00:00.000Z, source: fresh)"
        );

        let cached = StateReading {
            source: Provenance::Cache,
            caveat: Some("may be stale".into()),
            ..reading
        };
        assert_eq!(
            cached.annotate("Model color", "#ff0000"),
            "Model color: #ff0000 (queried at 2024-05-01T12:00:00.000Z, source: cache, may be stale)"
        );
    }

    #[test]
    fn request_state_is_the_query_frame() {
        // Keeps the wire tag used by query_live pinned.
        let frame = serde_json::to_value(ServerMessage::RequestState {
            request_id: "x".into(),
            force_refresh: false,
        })
        .unwrap();
        assert_eq!(frame["type"], "requestState");
    }
}
