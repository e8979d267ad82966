//! Delivers commands to exactly one client connection.
//!
//! The router never retries, queues or broadcasts on its own. The single
//! exception is [`CommandRouter::dispatch`] when no session can be resolved
//! at all: it then falls back to every bound connection, and logs that
//! distinctly because it breaks session isolation.

use crate::command::Command;
use crate::session::{current_session, SessionId};
use crate::transport::{Connection, TransportRegistry};

/// Outcome of [`CommandRouter::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the session's connection.
    Delivered(SessionId),
    /// The session has no live connection.
    NoRoute(SessionId),
    /// No session was resolvable; sent to this many connections instead.
    Broadcast(usize),
    /// No session was resolvable and nothing is connected.
    Dropped,
}

#[derive(Clone)]
pub struct CommandRouter {
    registry: TransportRegistry,
}

impl CommandRouter {
    pub fn new(registry: TransportRegistry) -> Self {
        Self { registry }
    }

    /// The live connection for `session`, if any.
    pub fn route(&self, session: &SessionId) -> Option<Connection> {
        self.registry
            .lookup(session)
            .filter(Connection::is_live)
    }

    /// Write `command` to the connection bound to `session`.
    ///
    /// Returns false when there is no live route; the caller decides how to
    /// surface that.
    pub fn send(&self, session: &SessionId, command: &Command) -> bool {
        let Some(connection) = self.route(session) else {
            tracing::debug!(session = %session, command = command.tag(), "no route for command");
            return false;
        };
        let delivered = connection.send_json(command);
        if delivered {
            tracing::debug!(session = %session, connection = %connection.id(), command = command.tag(), "command sent");
        } else {
            tracing::debug!(session = %session, connection = %connection.id(), "connection closed while sending");
        }
        delivered
    }

    /// Send `command` to the current session (see
    /// [`with_session`](crate::session::with_session)).
    pub fn dispatch(&self, command: &Command) -> Delivery {
        match current_session() {
            Some(session) => {
                if self.send(&session, command) {
                    Delivery::Delivered(session)
                } else {
                    Delivery::NoRoute(session)
                }
            }
            None => self.broadcast_unscoped(command),
        }
    }

    fn broadcast_unscoped(&self, command: &Command) -> Delivery {
        let connections = self.registry.connections();
        if connections.is_empty() {
            tracing::warn!(command = command.tag(), "no session bound to request and no clients connected, dropping command");
            return Delivery::Dropped;
        }
        let sent = connections
            .iter()
            .filter(|c| c.is_live())
            .filter(|c| c.send_json(command))
            .count();
        tracing::warn!(
            command = command.tag(),
            connections = sent,
            "DEGRADED: no session bound to request, broadcasting command to all clients"
        );
        Delivery::Broadcast(sent)
    }
}
