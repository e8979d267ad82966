//! Session identity and the ambient "current session" for in-flight work.
//!
//! Tool handlers are registered once and invoked without a session
//! parameter, so the session a call belongs to is carried as task-local
//! context. [`with_session`] establishes it for the dynamic extent of a
//! future (everything it awaits, transitively); [`current_session`] reads it
//! back from anywhere inside that extent.
//!
//! Work handed to `tokio::spawn` runs on a fresh task and does NOT inherit
//! the binding; re-enter [`with_session`] there if it is needed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rmcp::service::RequestContext;
use rmcp::RoleServer;
use serde::{Deserialize, Serialize};

/// Opaque session identifier shared by the agent side and the
/// visualization client. Possession of the id is enough to bind a
/// connection to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Generate a fresh random (UUIDv4) session id.
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

tokio::task_local! {
    static CURRENT_SESSION: SessionId;
}

/// Run `work` with `id` as the current session.
pub async fn with_session<F>(id: SessionId, work: F) -> F::Output
where
    F: Future,
{
    CURRENT_SESSION.scope(id, work).await
}

/// The session bound by the innermost enclosing [`with_session`], or `None`
/// outside any such extent.
pub fn current_session() -> Option<SessionId> {
    CURRENT_SESSION.try_with(|id| id.clone()).ok()
}

/// Header carrying the MCP session id on Streamable HTTP requests.
pub const MCP_SESSION_HEADER: &str = "mcp-session-id";

/// Where the MCP server finds the session for an inbound request.
///
/// The routing core only ever sees the resolved id; it never asks which
/// variant produced it.
#[derive(Debug, Clone)]
pub enum SessionSource {
    /// One process, one session, fixed at startup.
    Ambient(SessionId),
    /// Many sessions multiplexed through one process; each request names
    /// its own session in the `Mcp-Session-Id` header.
    PerRequest,
}

impl SessionSource {
    /// Resolve the session for the request described by `context`.
    pub fn resolve(&self, context: &RequestContext<RoleServer>) -> Option<SessionId> {
        match self {
            SessionSource::Ambient(id) => Some(id.clone()),
            SessionSource::PerRequest => context
                .extensions
                .get::<axum::http::request::Parts>()
                .and_then(|parts| parts.headers.get(MCP_SESSION_HEADER))
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(SessionId::from),
        }
    }

    /// The fixed id in ambient mode. Per-request sources have none until a
    /// request arrives.
    pub fn ambient(&self) -> Option<&SessionId> {
        match self {
            SessionSource::Ambient(id) => Some(id),
            SessionSource::PerRequest => None,
        }
    }
}
