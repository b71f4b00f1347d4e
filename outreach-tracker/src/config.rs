//! Configuration management for the outreach tracker.
//!
//! Loads configuration from TOML files and provides runtime defaults. Every
//! heuristic constant tied to the host UI lives here so it can be retuned
//! when the host changes its markup.

use outreach_store::{EventQueue, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub reporting: ReportingConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether tracking is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// How long to wait for a corroborating signal before giving up
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_ms: u64,

    /// Declared-intent label prefix that marks a sent invitation
    #[serde(default = "default_pending_prefix")]
    pub pending_label_prefix: String,

    /// Text fragments that mark a settled action
    #[serde(default = "default_terminal_markers")]
    pub terminal_markers: Vec<String>,

    /// Ancestor levels searched for a profile link
    #[serde(default = "default_max_ancestor_depth")]
    pub max_ancestor_depth: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            confirm_timeout_ms: default_confirm_timeout(),
            pending_label_prefix: default_pending_prefix(),
            terminal_markers: default_terminal_markers(),
            max_ancestor_depth: default_max_ancestor_depth(),
        }
    }
}

impl TrackingConfig {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Substring that identifies a connect button
    #[serde(default = "default_connect_keyword")]
    pub connect_keyword: String,

    /// Exact declared-intent labels of message send buttons
    #[serde(default = "default_send_labels")]
    pub send_labels: Vec<String>,

    /// Class names carried by message send buttons
    #[serde(default = "default_send_button_classes")]
    pub send_button_classes: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            connect_keyword: default_connect_keyword(),
            send_labels: default_send_labels(),
            send_button_classes: default_send_button_classes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Origin used to absolutize relative profile links
    #[serde(default = "default_host_origin")]
    pub host_origin: String,

    /// Path fragment that identifies a profile link
    #[serde(default = "default_profile_marker")]
    pub profile_path_marker: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            host_origin: default_host_origin(),
            profile_path_marker: default_profile_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Push finalized events to the remote API
    #[serde(default)]
    pub remote_enabled: bool,

    /// Endpoint receiving connect requests
    #[serde(default)]
    pub connect_endpoint: Option<String>,

    /// Endpoint receiving direct messages
    #[serde(default)]
    pub message_endpoint: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Buffer of the in-process message sink
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            remote_enabled: false,
            connect_endpoint: None,
            message_endpoint: None,
            request_timeout_ms: default_request_timeout(),
            sink_capacity: default_sink_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Event database path
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Number of events retained
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: None,
            capacity: default_queue_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(EventQueue::default_path)
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_confirm_timeout() -> u64 {
    5000
}

fn default_pending_prefix() -> String {
    "pending".to_string()
}

fn default_terminal_markers() -> Vec<String> {
    ["pending", "withdraw", "message", "requested", "sent"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_ancestor_depth() -> usize {
    8
}

fn default_connect_keyword() -> String {
    "connect".to_string()
}

fn default_send_labels() -> Vec<String> {
    vec!["send".to_string(), "send now".to_string()]
}

fn default_send_button_classes() -> Vec<String> {
    vec!["msg-form__send-button".to_string()]
}

fn default_host_origin() -> String {
    "https://www.linkedin.com".to_string()
}

fn default_profile_marker() -> String {
    "/in/".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_sink_capacity() -> usize {
    256
}

fn default_queue_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match Self::try_load_from_path(&path) {
            Ok(Some(config)) => {
                info!("Loaded configuration from {:?}", path);
                config
            }
            Ok(None) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Read and parse `path` without logging. `Ok(None)` when there is no
    /// file, so callers can report the outcome once logging is up.
    pub fn try_load_from_path(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(toml::from_str(&contents)?))
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("outreach-tracker")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
