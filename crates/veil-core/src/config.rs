//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use veil_rules::ManagerConfig;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the settings database
    pub database_path: PathBuf,
    /// Remote setting-exception document, if any
    pub remote_config_url: Option<String>,
    /// How long a fetched remote document stays fresh
    pub remote_cache_ttl_secs: u64,
    /// Value forced into outgoing `Accept-Language` headers
    pub accept_language: String,
    /// Block search-suggestion requests
    pub block_search_autocomplete: bool,
    /// Upper bound on a cross-context handshake round trip
    pub handshake_timeout_ms: u64,
    /// Page shown instead of plain HTTP after a failed secure load; unset
    /// disables HTTPS-only navigation rules
    pub http_warning_page: Option<String>,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("veil.db"),
            remote_config_url: None,
            remote_cache_ttl_secs: veil_settings::DEFAULT_CACHE_TTL.as_secs(),
            accept_language: "en-US".to_string(),
            block_search_autocomplete: true,
            handshake_timeout_ms: veil_signal::DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            http_warning_page: None,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Veil"))
            .unwrap_or_else(|| PathBuf::from(".veil"))
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.accept_language.trim().is_empty() {
            return Err(CoreError::Config("accept_language must not be empty".into()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(CoreError::Config("handshake_timeout_ms must be positive".into()));
        }
        if let Some(url) = &self.remote_config_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(CoreError::Config(format!("unsupported remote config URL: {}", url)));
            }
        }
        if let Some(page) = &self.http_warning_page {
            if !page.contains("://") {
                return Err(CoreError::Config(format!("http_warning_page must be a URL: {}", page)));
            }
        }
        Ok(())
    }

    pub fn remote_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.remote_cache_ttl_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            accept_language: self.accept_language.clone(),
            block_search_autocomplete: self.block_search_autocomplete,
            http_warning_page: self.http_warning_page.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

// Simple dirs implementation for the platform data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
