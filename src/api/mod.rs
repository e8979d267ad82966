pub mod error;
mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::mcp::SceneMcpServer;
use crate::session::{SessionSource, MCP_SESSION_HEADER};

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub config: Arc<BridgeConfig>,
}

/// Which optional parts of the HTTP surface to mount.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Serve MCP over Streamable HTTP at `/mcp`, one session per MCP client.
    pub mcp_http: bool,
    pub static_dir: Option<PathBuf>,
    pub cors_origins: Vec<String>,
}

impl RouterConfig {
    pub fn from_config(config: &BridgeConfig, mcp_http: bool) -> Self {
        Self {
            mcp_http,
            static_dir: config.static_dir.clone(),
            cors_origins: config.cors_origins.clone(),
        }
    }
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_client))
        .route("/sessions", get(session_list))
        .route("/sessions/{id}", get(session_get))
        .with_state(state.clone());

    if config.mcp_http {
        use rmcp::transport::streamable_http_server::{
            session::local::LocalSessionManager, StreamableHttpServerConfig,
            StreamableHttpService,
        };

        let mcp_state = state;
        let mcp_service = StreamableHttpService::new(
            move || {
                Ok(SceneMcpServer::new(
                    mcp_state.bridge.clone(),
                    SessionSource::PerRequest,
                    mcp_state.config.clone(),
                ))
            },
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig::default(),
        );
        router = router.nest_service("/mcp", mcp_service);
    }

    if let Some(dir) = config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    let router = router.layer(TraceLayer::new_for_http());

    // Conditionally apply CORS if origins are configured.
    if config.cors_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        let session_header = HeaderName::from_static(MCP_SESSION_HEADER);
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, session_header.clone()])
                .expose_headers([session_header]),
        )
    }
}
