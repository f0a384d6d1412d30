use hearth_client::{ClientConfig, ClientError, DEFAULT_BASE_URL};
use hearth_core::sync::{SyncConfig, DEFAULT_PROBE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// CLI configuration: defaults, then an optional TOML file, then `HEARTH_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Appliance base URL (default: http://localhost:8000).
    pub base_url: String,
    /// Seconds between push-channel liveness probes.
    pub heartbeat_secs: u64,
    /// Maximum events kept in the feed.
    pub feed_capacity: usize,
    /// Seconds between `/active` polls.
    pub active_poll_secs: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            heartbeat_secs: 15,
            feed_capacity: 50,
            active_poll_secs: 2,
            request_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("HEARTH_BASE_URL") {
            self.base_url = url;
        }
        self.heartbeat_secs = env_parse(&lookup, "HEARTH_HEARTBEAT_SECS", self.heartbeat_secs);
        self.feed_capacity = env_parse(&lookup, "HEARTH_FEED_CAPACITY", self.feed_capacity);
        self.active_poll_secs =
            env_parse(&lookup, "HEARTH_ACTIVE_POLL_SECS", self.active_poll_secs);
        self.request_timeout_secs =
            env_parse(&lookup, "HEARTH_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_secs must be > 0".into()));
        }
        if self.feed_capacity == 0 {
            return Err(ConfigError::Invalid("feed_capacity must be > 0".into()));
        }
        if self.active_poll_secs == 0 {
            return Err(ConfigError::Invalid("active_poll_secs must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn client_config(&self) -> Result<ClientConfig, ClientError> {
        let mut client = ClientConfig::new(&self.base_url)?;
        client.request_timeout = Duration::from_secs(self.request_timeout_secs);
        Ok(client)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            capacity: self.feed_capacity,
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            probe: DEFAULT_PROBE.to_string(),
        }
    }

    pub fn active_poll(&self) -> Duration {
        Duration::from_secs(self.active_poll_secs)
    }
}

/// `$XDG_CONFIG_HOME/hearth/config.toml`, falling back to `~/.config`.
fn default_path() -> Option<PathBuf> {
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok()?;
    Some(config_dir.join("hearth").join("config.toml"))
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            default
        }),
        None => default,
    }
}
