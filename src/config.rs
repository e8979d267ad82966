use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::correlation::DEFAULT_QUERY_TIMEOUT;
use crate::session::SessionId;

/// Bridge settings, loaded from TOML. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address for the HTTP/WebSocket listener.
    pub bind: SocketAddr,
    /// How long a live state query waits for the client.
    pub query_timeout_ms: u64,
    /// Directory with the viewer's static files, served at `/`.
    pub static_dir: Option<PathBuf>,
    /// Externally reachable base URL of the viewer, if it differs from
    /// `http://<bind>`.
    pub public_url: Option<String>,
    /// Origins allowed by CORS. Empty disables the CORS layer.
    pub cors_origins: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT.as_millis() as u64,
            static_dir: None,
            public_url: None,
            cors_origins: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// `<config_dir>/scenebridge/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scenebridge").join("config.toml"))
    }

    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self = toml::from_str(&contents)
            .map_err(|source| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// when the file is absent.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };
        match resolved {
            Some(p) => {
                let loaded = Self::load(&p)?;
                if loaded.is_some() {
                    tracing::debug!(path = %p.display(), "loaded config");
                }
                Ok(loaded.unwrap_or_default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "query_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(ref url) = self.public_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "public_url must start with http:// or https://, got '{url}'"
                )));
            }
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Base URL the viewer is reached at.
    pub fn base_url(&self) -> String {
        match self.public_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind),
        }
    }

    /// URL that opens the viewer already bound to `session`.
    pub fn viewer_url(&self, session: &SessionId) -> String {
        format!(
            "{}/?sessionId={}",
            self.base_url(),
            urlencoding::encode(session.as_str())
        )
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
