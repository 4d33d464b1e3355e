//! Configuration management for qforward
//!
//! Handles persistent settings for the relay daemon: bind addresses,
//! the default GraphQL endpoint, and request-handling knobs.
//! Supports Windows, macOS, and Linux.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_validate_queries() -> bool {
    true
}

/// Relay daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Address the client-facing listener binds to
    pub client_bind: String,
    /// Address executor hosts attach to
    pub host_bind: String,
    /// GraphQL endpoint used when a request does not name one
    pub default_endpoint: String,
    /// Seconds to wait for an executor response before giving up
    pub request_timeout_secs: u64,
    /// Minimum length for a discovered token to count as valid
    pub min_token_length: usize,
    /// Validate queries at the broker before dispatching them
    #[serde(default = "default_validate_queries")]
    pub validate_queries: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            client_bind: "127.0.0.1:8766".to_string(),
            host_bind: "127.0.0.1:8765".to_string(),
            default_endpoint: "https://canvas.instructure.com/api/graphql".to_string(),
            request_timeout_secs: 30,
            min_token_length: 12,
            validate_queries: true,
        }
    }
}

impl ForwarderConfig {
    /// Gets the config directory path (cross-platform)
    fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|p| PathBuf::from(p).join("qforward"))
        }

        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|p| PathBuf::from(p).join("Library/Application Support/qforward"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config")))
                .map(|p| p.join("qforward"))
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }

    /// Gets the config file path
    fn config_path() -> Option<PathBuf> {
        let config_dir = Self::config_dir()?;

        // Create directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).ok()?;
        }

        Some(config_dir.join("config.json"))
    }

    /// Loads configuration from disk, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Some(config) = Self::load_from(&path) {
                    return config;
                }
                tracing::warn!("Ignoring unreadable config at {}", path.display());
            }
        }
        Self::default()
    }

    /// Loads configuration from a specific path
    pub fn load_from(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Saves configuration to disk
    pub fn save(&self) -> Result<(), String> {
        let path = Self::config_path().ok_or("Could not determine config path")?;
        self.save_to(&path)
    }

    /// Saves configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }

    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
