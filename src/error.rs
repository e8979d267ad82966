use std::time::Duration;

use thiserror::Error;

use crate::session::SessionId;

/// Failures of the routing and reconciliation core.
///
/// None of these are fatal to the process. Write paths surface them as a
/// "not delivered" outcome; read paths fall back to the cache where one
/// exists and otherwise render the message into the tool response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No live transport is bound to the session.
    #[error("browser not connected for session {0}")]
    NoRoute(SessionId),

    /// The browser did not answer a state query before the deadline.
    #[error("timed out after {} ms waiting for browser state", .0.as_millis())]
    Timeout(Duration),

    /// The transport closed while the request was outstanding.
    #[error("browser disconnected before replying")]
    TransportLost,

    /// The browser answered with an explicit error.
    #[error("browser reported an error: {0}")]
    ClientError(String),

    /// The request is not bound to any session.
    #[error("no session is bound to this request")]
    NoSession,

    /// The bridge is shutting down and no longer serves queries.
    #[error("bridge is shutting down")]
    ShuttingDown,

    /// The browser sent a state payload that is not a complete object.
    #[error("invalid state payload: {0}")]
    InvalidSnapshot(String),
}
