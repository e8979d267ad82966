//! scenebridge - MCP bridge to a browser-based 3D viewer
//!
//! ## Modes
//!
//! **stdio** (default): one process, one session. Generates a session id,
//! serves MCP over stdin/stdout and the viewer WebSocket over HTTP. The
//! viewer URL carrying the session id is logged to stderr.
//!
//! **serve**: many sessions through one process. MCP is served over
//! Streamable HTTP at `/mcp`; each MCP session id doubles as the viewer
//! session id.

use clap::{Parser as ClapParser, Subcommand};
use rmcp::ServiceExt;
use scenebridge::{
    api,
    bridge::Bridge,
    config::{BridgeConfig, ConfigError},
    mcp::SceneMcpServer,
    session::{SessionId, SessionSource},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// scenebridge - drive a 3D viewer from an MCP agent
#[derive(ClapParser, Debug)]
#[command(name = "scenebridge", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a TOML config file (defaults to <config dir>/scenebridge/config.toml)
    #[arg(long, env = "SCENEBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP/WebSocket server
    #[arg(long, env = "SCENEBRIDGE_BIND", global = true)]
    bind: Option<SocketAddr>,

    /// How long a live state query waits for the viewer, in milliseconds
    #[arg(long, global = true)]
    query_timeout_ms: Option<u64>,

    /// Directory with the viewer's static files, served at `/`
    #[arg(long, global = true)]
    static_dir: Option<PathBuf>,

    /// Externally reachable base URL used in viewer links
    #[arg(long, env = "SCENEBRIDGE_PUBLIC_URL", global = true)]
    public_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Serve MCP over stdio for a single session (default)
    Stdio,
    /// Serve MCP over Streamable HTTP at /mcp, one session per MCP client
    Serve,
}

#[derive(Error, Debug)]
pub enum BridgeMainError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mcp error: {0}")]
    Mcp(String),
}

impl Cli {
    /// File config with command-line overrides applied.
    fn resolve_config(&self) -> Result<BridgeConfig, ConfigError> {
        let mut config = BridgeConfig::load_or_default(self.config.as_deref())?;
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(ms) = self.query_timeout_ms {
            config.query_timeout_ms = ms;
        }
        if let Some(ref dir) = self.static_dir {
            config.static_dir = Some(dir.clone());
        }
        if let Some(ref url) = self.public_url {
            config.public_url = Some(url.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), BridgeMainError> {
    let cli = Cli::parse();
    let mode = cli.command.unwrap_or(Commands::Stdio);

    // stdout carries JSON-RPC in stdio mode; logs must not touch it.
    if mode == Commands::Stdio {
        init_tracing_stderr();
    } else {
        init_tracing();
    }

    let config = Arc::new(cli.resolve_config()?);
    match mode {
        Commands::Stdio => run_stdio(config).await,
        Commands::Serve => run_serve(config).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "scenebridge=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize tracing with stderr output.
fn init_tracing_stderr() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "scenebridge=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── stdio mode ─────────────────────────────────────────────────────

async fn run_stdio(config: Arc<BridgeConfig>) -> Result<(), BridgeMainError> {
    let session = SessionId::generate();
    let bridge = Bridge::new(config.query_timeout());
    let state = api::AppState {
        bridge: bridge.clone(),
        config: config.clone(),
    };
    let app = api::router(state, api::RouterConfig::from_config(&config, false));

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP/WS server listening");
    tracing::info!(session = %session, url = %config.viewer_url(&session), "open this URL to connect a viewer");

    let shutdown = bridge.shutdown_token();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    let server = SceneMcpServer::new(bridge.clone(), SessionSource::Ambient(session), config);
    let outcome = async {
        let running = server
            .serve(rmcp::transport::stdio())
            .await
            .map_err(|e| BridgeMainError::Mcp(e.to_string()))?;
        tokio::select! {
            result = running.waiting() => {
                if let Err(e) = result {
                    tracing::warn!(?e, "MCP service ended with an error");
                }
                tracing::info!("stdin closed");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl+C");
            }
        }
        Ok::<(), BridgeMainError>(())
    }
    .await;

    finish(bridge, http_handle).await;
    tracing::info!("scenebridge exiting");
    outcome
}

// ── serve mode ─────────────────────────────────────────────────────

async fn run_serve(config: Arc<BridgeConfig>) -> Result<(), BridgeMainError> {
    let bridge = Bridge::new(config.query_timeout());
    let state = api::AppState {
        bridge: bridge.clone(),
        config: config.clone(),
    };
    let app = api::router(state, api::RouterConfig::from_config(&config, true));

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP/WS server listening, MCP at /mcp");

    let shutdown = bridge.shutdown_token();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(?e, "failed to listen for Ctrl+C");
    }
    tracing::info!("received Ctrl+C");

    finish(bridge, http_handle).await;
    tracing::info!("scenebridge exiting");
    Ok(())
}

/// Shut the bridge down and wait for the HTTP server to drain.
async fn finish(bridge: Bridge, http_handle: tokio::task::JoinHandle<std::io::Result<()>>) {
    // Cancelling the token also tells every socket loop to send a close frame.
    bridge.shutdown();
    match http_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(?e, "HTTP server error"),
        Err(e) => tracing::warn!(?e, "HTTP server task panicked"),
    }
}
