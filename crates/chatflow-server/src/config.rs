//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (first of [`CONFIG_PATHS`] that exists)
//! - Environment variables (`CHATFLOW_PORT`, `CHATFLOW_LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{Context, Result};
use chatflow_core::{HubConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Files probed by [`Config::load`], in order.
pub const CONFIG_PATHS: [&str; 3] = [
    "chatflow.toml",
    "/etc/chatflow/chatflow.toml",
    "~/.config/chatflow/chatflow.toml",
];

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "CHATFLOW";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Hub retention settings.
    #[serde(default)]
    pub hub: HubSection,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Upload authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upload storage.
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum display name length, in characters.
    #[serde(default = "default_max_display_name_length")]
    pub max_display_name_length: usize,

    /// Events buffered per connection before new ones are dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Hub retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Broadcast messages kept for polling clients.
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,

    /// Messages whose delivery status is tracked.
    #[serde(default = "default_tracked_messages")]
    pub tracked_messages: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Upload authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens. Uploads are refused without one.
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

/// Upload storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory holding uploaded files.
    #[serde(default = "default_upload_dir")]
    pub dir: String,

    /// Base URL used in links to uploaded files. Derived from the bind
    /// address when unset.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Maximum upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_display_name_length() -> usize {
    chatflow_core::registry::DEFAULT_MAX_DISPLAY_NAME_LENGTH
}

fn default_outbound_queue_capacity() -> usize {
    chatflow_core::peer::DEFAULT_OUTBOUND_CAPACITY
}

fn default_backlog_capacity() -> usize {
    100
}

fn default_tracked_messages() -> usize {
    chatflow_core::delivery::DEFAULT_TRACKED_MESSAGES
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_upload_dir() -> String {
    "./uploads".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10 MB
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            hub: HubSection::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_display_name_length: default_max_display_name_length(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            backlog_capacity: default_backlog_capacity(),
            tracked_messages: default_tracked_messages(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            public_base_url: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file or variable cannot be parsed.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::layered(file.as_deref())
    }

    /// Merge defaults, an optional TOML file and `CHATFLOW_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed.
    pub fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = file {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub settings derived from the limits and retention sections.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.limits.max_connections,
            outbound_queue_capacity: self.limits.outbound_queue_capacity,
            max_display_name_length: self.limits.max_display_name_length,
            tracked_messages: self.hub.tracked_messages,
            router: RouterConfig {
                backlog_capacity: self.hub.backlog_capacity,
                max_message_size: self.limits.max_message_size,
            },
        }
    }

    /// Base URL for links to uploaded files.
    #[must_use]
    pub fn public_base_url(&self) -> String {
        match &self.upload.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}
