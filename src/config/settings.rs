// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Pause between heartbeats; also bounds shutdown latency (default: 5000)
    pub heartbeat_interval_ms: u64,

    /// Working directory after detaching (default: "/")
    pub working_directory: PathBuf,

    /// Log file the process-wide sink appends to
    pub log_file: PathBuf,

    /// Fallback filter when RUST_LOG is unset (default: "info")
    pub log_level: String,

    /// Optional PID file
    pub pid_file: Option<PathBuf>,

    /// Hosted HTTP service
    pub server: ServerConfig,
}

impl DaemonConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5000,
            working_directory: PathBuf::from("/"),
            log_file: default_log_file(),
            log_level: "info".to_string(),
            pid_file: None,
            server: ServerConfig::default(),
        }
    }
}

/// Configuration for the hosted HTTP service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host the gateway routes after detaching
    pub enabled: bool,
    /// Bind address (e.g., "0.0.0.0")
    pub bind_address: String,
    /// Bind port, 1..=65535
    pub port: u16,
    /// Redirect target for desktop clients
    pub web_ui_url: String,
    /// Redirect target for mobile clients
    pub mobile_ui_url: String,
    /// Base URL of the auth service
    pub auth_url: String,
    /// Where the identity provider sends users back after login
    pub auth_callback_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0".to_string(),
            port: 8084,
            web_ui_url: "http://chinta-web:8000".to_string(),
            mobile_ui_url: "http://chinta-web:8000/m".to_string(),
            auth_url: "http://chinta-auth:8083".to_string(),
            auth_callback_url: "http://localhost:8084/auth/callback".to_string(),
        }
    }
}

/// ~/.chinta, or the temp dir when there is no home directory
pub fn chinta_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".chinta")
}

fn default_log_file() -> PathBuf {
    chinta_dir().join("daemon.log")
}
