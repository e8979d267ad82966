#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use scenebridge::api::{self, AppState, RouterConfig};
use scenebridge::bridge::Bridge;
use scenebridge::config::BridgeConfig;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A bridge served on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub bridge: Bridge,
}

pub async fn start_server(query_timeout: Duration, mcp_http: bool) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bridge = Bridge::new(query_timeout);
    let config = BridgeConfig {
        bind: addr,
        ..Default::default()
    };
    let state = AppState {
        bridge: bridge.clone(),
        config: Arc::new(config),
    };
    let app = api::router(
        state,
        RouterConfig {
            mcp_http,
            ..Default::default()
        },
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    TestServer { addr, bridge }
}

/// Plays the visualization client over a real WebSocket.
pub struct Viewer {
    pub tx: SplitSink<Ws, Message>,
    pub rx: SplitStream<Ws>,
}

impl Viewer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let (tx, rx) = ws.split();
        Self { tx, rx }
    }

    /// Connect and register for `session`, waiting for the ack.
    pub async fn register(addr: SocketAddr, session: &str) -> Self {
        let mut viewer = Self::connect(addr).await;
        viewer
            .send_json(json!({"type": "registerSession", "sessionId": session}))
            .await;
        let ack = viewer.recv_json().await;
        assert_eq!(ack, json!({"type": "sessionRegistered", "sessionId": session}));
        viewer
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    /// Send a raw text frame, valid JSON or not.
    pub async fn send_text(&mut self, text: &str) {
        self.tx
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.rx.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws error")
    }

    pub async fn recv_json(&mut self) -> Value {
        match self.recv().await {
            Message::Text(text) => serde_json::from_str(text.as_str()).expect("invalid JSON"),
            other => panic!("expected text message, got {:?}", other),
        }
    }

    /// Receive a JSON message if one arrives within `wait`.
    pub async fn try_recv_json(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.rx.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(text.as_str()).ok(),
            _ => None,
        }
    }

    /// Answer the next `requestState` with `state`. Returns the request.
    pub async fn answer_state(&mut self, state: Value) -> Value {
        let request = self.recv_json().await;
        assert_eq!(request["type"], "requestState");
        self.send_json(json!({
            "type": "stateResponse",
            "requestId": request["requestId"],
            "state": state,
        }))
        .await;
        request
    }

    pub async fn close(mut self) {
        let _ = self.tx.send(Message::Close(None)).await;
        let _ = self.tx.close().await;
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
