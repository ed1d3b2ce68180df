//! Configuration for the `chatlink` client.
//!
//! Layered, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatlink/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. An explicit `--config`
//! path that doesn't exist is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::Author;
use crate::policy::PolicyConfig;
use crate::session::SessionConfig;
use chatlink_proto::message::UserId;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    live: LiveFileConfig,
    api: ApiFileConfig,
    session: SessionFileConfig,
}

/// `[live]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LiveFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
    max_attempts: Option<u32>,
    warn_threshold: Option<u32>,
    disable_threshold: Option<u32>,
}

/// `[api]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    url: Option<String>,
    request_timeout_secs: Option<u64>,
    page_size: Option<u32>,
}

/// `[session]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    user_name: Option<String>,
    role: Option<String>,
    token: Option<String>,
    state_file: Option<PathBuf>,
    channel_capacity: Option<usize>,
    event_buffer: Option<usize>,
    typing_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    // -- Live channel --
    /// WebSocket URL of the live channel.
    pub live_url: String,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Delay before a scheduled reconnect.
    pub reconnect_delay: Duration,
    /// Retry and failure thresholds.
    pub policy: PolicyConfig,

    // -- Fallback API --
    /// Base URL of the REST backend.
    pub api_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Items per list page.
    pub page_size: u32,

    // -- Session --
    /// Local user id.
    pub user_id: String,
    /// Local display name.
    pub user_name: String,
    /// Role tag sent as `userType`.
    pub role: String,
    /// Bearer credential for both paths.
    pub token: Option<String>,
    /// Where the disabled flag persists; `None` uses the platform data dir.
    pub state_file: Option<PathBuf>,
    /// Capacity of command and socket channels.
    pub channel_capacity: usize,
    /// Capacity of the UI event channel.
    pub event_buffer: usize,
    /// Quiet period before a typing indicator decays.
    pub typing_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            live_url: "ws://127.0.0.1:5000/api/chat/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            policy: PolicyConfig::default(),
            api_url: "http://127.0.0.1:5000".to_string(),
            request_timeout: Duration::from_secs(10),
            page_size: 20,
            user_id: "anonymous".to_string(),
            user_name: "Anonymous".to_string(),
            role: "patient".to_string(),
            token: None,
            state_file: None,
            channel_capacity: 256,
            event_buffer: 64,
            typing_timeout: Duration::from_secs(3),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("live_url", &self.live_url)
            .field("api_url", &self.api_url)
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("has_token", &self.token.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// or if any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            live_url: cli
                .live_url
                .clone()
                .or_else(|| file.live.url.clone())
                .unwrap_or(defaults.live_url),
            connect_timeout: file
                .live
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            reconnect_delay: file
                .live
                .reconnect_delay_secs
                .map_or(defaults.reconnect_delay, Duration::from_secs),
            policy: PolicyConfig {
                max_attempts: file
                    .live
                    .max_attempts
                    .unwrap_or(defaults.policy.max_attempts),
                warn_threshold: file
                    .live
                    .warn_threshold
                    .unwrap_or(defaults.policy.warn_threshold),
                disable_threshold: file
                    .live
                    .disable_threshold
                    .unwrap_or(defaults.policy.disable_threshold),
            },
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.api.url.clone())
                .unwrap_or(defaults.api_url),
            request_timeout: file
                .api
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            page_size: file.api.page_size.unwrap_or(defaults.page_size),
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone())
                .unwrap_or(defaults.user_id),
            user_name: cli
                .user_name
                .clone()
                .or_else(|| file.session.user_name.clone())
                .unwrap_or(defaults.user_name),
            role: cli
                .role
                .clone()
                .or_else(|| file.session.role.clone())
                .unwrap_or(defaults.role),
            token: cli
                .token
                .clone()
                .or_else(|| file.session.token.clone())
                .filter(|t| !t.is_empty()),
            state_file: cli
                .state_file
                .clone()
                .or_else(|| file.session.state_file.clone()),
            channel_capacity: file
                .session
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            event_buffer: file
                .session
                .event_buffer
                .unwrap_or(defaults.event_buffer),
            typing_timeout: file
                .session
                .typing_timeout_secs
                .map_or(defaults.typing_timeout, Duration::from_secs),
        }
    }

    /// The local user.
    #[must_use]
    pub fn author(&self) -> Author {
        Author::new(
            UserId::new(self.user_id.clone()),
            self.user_name.clone(),
            self.role.clone(),
        )
    }

    /// Session tunables derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            me: self.author(),
            event_buffer: self.event_buffer,
            socket_buffer: self.channel_capacity,
            reconnect_delay: self.reconnect_delay,
            typing_timeout: self.typing_timeout,
            page_size: self.page_size,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Chat client with a live channel and HTTP fallback")]
pub struct CliArgs {
    /// WebSocket URL of the live channel.
    #[arg(long, env = "CHATLINK_LIVE_URL")]
    pub live_url: Option<String>,

    /// Base URL of the REST backend.
    #[arg(long, env = "CHATLINK_API_URL")]
    pub api_url: Option<String>,

    /// Local user id.
    #[arg(long, env = "CHATLINK_USER_ID")]
    pub user_id: Option<String>,

    /// Local display name.
    #[arg(long)]
    pub user_name: Option<String>,

    /// Role tag (patient, doctor, ...).
    #[arg(long)]
    pub role: Option<String>,

    /// Bearer token for both paths.
    #[arg(long, env = "CHATLINK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// File holding the persisted disabled flag.
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Path to config file (default: `~/.config/chatlink/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATLINK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/chatlink.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Load and parse a TOML config file.
///
/// An explicit path must exist. Without one the default path is tried and
/// a missing file counts as empty.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("chatlink").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
