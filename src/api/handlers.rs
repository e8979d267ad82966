use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;

use crate::bridge::{Bridge, SessionInfo, SessionSummary};
use crate::session::SessionId;
use crate::transport::SessionStatus;

use super::error::ApiError;
use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(super) async fn session_list(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.bridge.sessions())
}

pub(super) async fn session_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let info = state.bridge.session_info(&SessionId::from(id.as_str()));
    if info.status == SessionStatus::Unbound && info.snapshot.is_none() {
        return Err(ApiError::SessionNotFound(id));
    }
    Ok(Json(info))
}

pub(super) async fn ws_client(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    if state.bridge.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }
    Ok(ws.on_upgrade(|socket| handle_client_socket(socket, state.bridge)))
}

/// Pump one visualization client: outbound frames queued on its
/// [`Connection`](crate::transport::Connection) go to the socket, inbound
/// frames go to the bridge.
async fn handle_client_socket(socket: WebSocket, bridge: Bridge) {
    let (connection, mut outbound) = bridge.registry().open();
    let shutdown = bridge.shutdown_token();
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!(connection = %connection.id(), "client connected");

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        bridge.handle_client_message(&connection, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(e)) => {
                        tracing::debug!(connection = %connection.id(), error = %e, "client socket error");
                        break;
                    }
                }
            }

            _ = shutdown.cancelled() => {
                tracing::debug!(connection = %connection.id(), "closing client socket for shutdown");
                let close_frame = CloseFrame {
                    code: axum::extract::ws::close_code::NORMAL,
                    reason: "server shutting down".into(),
                };
                let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
                let _ = ws_tx.flush().await;
                break;
            }
        }
    }

    // Stop accepting frames before tearing down, so the registry never hands
    // out a connection whose socket is gone.
    outbound.close();
    bridge.connection_closed(connection.id());
}
