//! Service configuration, loaded from a TOML file with environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use selector_engine::SelectionConfig;

use crate::error::{Error, Result};

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Shared secret expected in the `token` request header. Empty disables
    /// the check.
    pub token: String,
    /// Directory for rolling log files.
    pub log_dir: String,
    /// Rolled log files older than this many days are deleted.
    pub log_retention_days: i64,
    /// Cookie of last resort when every other source comes up empty.
    pub fixed_cookie: Option<String>,
    /// Staleness window for cached WBI keys, in seconds.
    pub wbi_refresh_interval_secs: u64,
    /// Selection engine settings.
    pub selection: SelectionConfig,
    /// External cookie manager settings.
    pub cookie_manager: CookieManagerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 38000,
            token: String::new(),
            log_dir: "logs".to_string(),
            log_retention_days: 7,
            fixed_cookie: None,
            wbi_refresh_interval_secs: 4 * 60 * 60,
            selection: SelectionConfig::default(),
            cookie_manager: CookieManagerConfig::default(),
        }
    }
}

/// External cookie manager service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieManagerConfig {
    /// Query the manager at all.
    pub enable: bool,
    /// Manager base address.
    pub api_url: String,
    /// Bearer token for the batch endpoint.
    pub token: Option<String>,
    /// Path of the single-cookie fallback endpoint.
    pub path: String,
    /// How long a fetched cookie pool stays fresh, in milliseconds.
    pub cache_ttl_ms: u64,
}

impl Default for CookieManagerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            api_url: "http://127.0.0.1:18000".to_string(),
            token: None,
            path: "/api/cookie/random?type=sim".to_string(),
            cache_ttl_ms: 120_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from the path in `STREAMGATE_CONFIG` (default
    /// `streamgate.toml`). A missing file falls back to defaults; a present
    /// but unparsable file is an error. Environment variables
    /// `STREAMGATE_HOST`, `STREAMGATE_PORT` and `STREAMGATE_TOKEN` override
    /// the file.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("STREAMGATE_CONFIG").unwrap_or_else(|_| "streamgate.toml".to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env_overrides();
        config.selection.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("STREAMGATE_HOST")
            && !host.trim().is_empty()
        {
            self.host = host;
        }
        if let Ok(port) = std::env::var("STREAMGATE_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            self.port = parsed;
        }
        if let Ok(token) = std::env::var("STREAMGATE_TOKEN")
            && !token.is_empty()
        {
            self.token = token;
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
