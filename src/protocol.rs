//! WebSocket wire protocol between the bridge and visualization clients.
//!
//! Every frame is a JSON text message tagged by `type`:
//!
//! | direction | `type`              | fields                       |
//! |-----------|---------------------|------------------------------|
//! | client →  | `registerSession`   | `sessionId`                  |
//! | → client  | `sessionRegistered` | `sessionId`                  |
//! | → client  | `requestState`      | `requestId`, `forceRefresh`  |
//! | client →  | `stateResponse`     | `requestId`, `state`         |
//! | client →  | `stateError`        | `requestId`, `error`         |
//! | client →  | `stateUpdate`       | `state`, `timestamp`         |
//! | → client  | command tag         | see [`Command`](crate::command::Command) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlation::RequestId;
use crate::session::SessionId;

/// Frames the client sends to the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    RegisterSession {
        session_id: SessionId,
    },
    StateResponse {
        request_id: RequestId,
        #[serde(default)]
        state: Value,
    },
    StateError {
        request_id: RequestId,
        error: String,
    },
    StateUpdate {
        #[serde(default)]
        state: Value,
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

/// Control frames the bridge sends to the client. Commands are sent as
/// their own tagged objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    SessionRegistered {
        session_id: SessionId,
    },
    RequestState {
        request_id: RequestId,
        force_refresh: bool,
    },
}

/// Interpret a client-supplied `timestamp`: epoch milliseconds or an
/// RFC 3339 string. Anything else yields `None`.
pub fn parse_client_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}
