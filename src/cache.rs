//! Per-session snapshot of the visualization client's last known state.
//!
//! Snapshots are replaced wholesale, never merged: an entry is always the
//! complete object a client sent, or absent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;
use crate::session::SessionId;

/// Full scene state as reported by the client.
///
/// The layout is owned by the client (model transform and color, key and
/// fill light rigs, camera, background); the bridge only requires that it
/// is a JSON object and reads fields by pointer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(Value);

impl Snapshot {
    pub fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Object(_) => Ok(Self(value)),
            Value::Null => Err(BridgeError::InvalidSnapshot("state is missing".into())),
            other => Err(BridgeError::InvalidSnapshot(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Look up a field by JSON pointer, e.g. `/model/color`.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.0.pointer(pointer)
    }

    pub fn f64_at(&self, pointer: &str) -> Option<f64> {
        self.pointer(pointer).and_then(Value::as_f64)
    }

    pub fn str_at(&self, pointer: &str) -> Option<&str> {
        self.pointer(pointer).and_then(Value::as_str)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// How a returned snapshot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Just round-tripped from the client.
    Fresh,
    /// Served from the cache without contacting the client.
    Cache,
    /// Last written by an unsolicited client push.
    Pushed,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Fresh => "fresh",
            Provenance::Cache => "cache",
            Provenance::Pushed => "pushed",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache entry. `origin` records how the entry got there
/// ([`Provenance::Fresh`] or [`Provenance::Pushed`]).
#[derive(Debug, Clone)]
pub struct CachedState {
    pub snapshot: Arc<Snapshot>,
    pub captured_at: DateTime<Utc>,
    pub origin: Provenance,
}

#[derive(Clone, Default)]
pub struct StateCache {
    inner: Arc<RwLock<HashMap<SessionId, CachedState>>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session: &SessionId) -> Option<CachedState> {
        self.inner.read().get(session).cloned()
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.inner.read().contains_key(session)
    }

    /// Replace the session's entry (last write wins).
    pub fn store(
        &self,
        session: &SessionId,
        snapshot: Arc<Snapshot>,
        origin: Provenance,
        captured_at: DateTime<Utc>,
    ) -> CachedState {
        let entry = CachedState {
            snapshot,
            captured_at,
            origin,
        };
        self.inner.write().insert(session.clone(), entry.clone());
        entry
    }

    pub fn evict(&self, session: &SessionId) -> bool {
        self.inner.write().remove(session).is_some()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
