//! Configuration types for subtitle-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for the subtitle pipeline
///
/// All fields have serde defaults so a partial document (or none at all)
/// yields a working configuration. [`Config::from_env`] overlays the
/// environment variables used by the deployed bot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Staging directory for downloads and extracted subtitles (default: "downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Interval between status view refreshes (default: 10 seconds)
    #[serde(default = "default_refresh_interval", with = "duration_serde")]
    pub refresh_interval: Duration,

    /// Interval between download handle polls and queue re-checks (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Retry policy for transient collaborator failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// External tool configuration
    #[serde(default)]
    pub tools: ToolsConfig,

    /// aria2 JSON-RPC endpoint
    #[serde(default)]
    pub aria2: Aria2Config,

    /// Status view configuration
    #[serde(default)]
    pub status: StatusConfig,

    /// Default log filter when RUST_LOG is unset (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            refresh_interval: default_refresh_interval(),
            poll_interval: default_poll_interval(),
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
            aria2: Aria2Config::default(),
            status: StatusConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Retry configuration for transient failures
///
/// Backoff is linear: retry `n` waits `base_delay * n`, capped at `max_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay unit for linear backoff (default: 2 seconds)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// MKVToolNix binaries and process limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Explicit mkvmerge path (None = search PATH)
    #[serde(default)]
    pub mkvmerge_path: Option<PathBuf>,

    /// Explicit mkvextract path (None = search PATH)
    #[serde(default)]
    pub mkvextract_path: Option<PathBuf>,

    /// Search PATH for binaries when explicit paths are unset
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// `nice` level applied to extraction commands on Unix (None = no prefix)
    #[serde(default = "default_nice_level")]
    pub nice_level: Option<i32>,

    /// Per-command timeout (default: 60 seconds)
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mkvmerge_path: None,
            mkvextract_path: None,
            search_path: true,
            nice_level: default_nice_level(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// aria2 JSON-RPC connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Aria2Config {
    /// RPC endpoint (default: "http://localhost:6800/jsonrpc")
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// RPC secret token, sent as `token:<secret>`
    #[serde(default)]
    pub secret: Option<String>,

    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            secret: None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Status view settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Tasks per page in the status view (default: 4)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Config {
    /// Build a configuration from defaults overlaid with environment variables
    ///
    /// Recognised variables: `DOWNLOAD_DIR`, `UPDATE_INTERVAL`, `POLL_INTERVAL`,
    /// `MAX_RETRIES`, `BASE_RETRY_DELAY`, `ARIA2_RPC_URL`, `ARIA2_SECRET`,
    /// `MKVMERGE_PATH`, `MKVEXTRACT_PATH`, `LOG_LEVEL`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_var("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_parse::<f64>("UPDATE_INTERVAL")? {
            config.refresh_interval = secs_to_duration("UPDATE_INTERVAL", secs)?;
        }
        if let Some(secs) = env_parse::<f64>("POLL_INTERVAL")? {
            config.poll_interval = secs_to_duration("POLL_INTERVAL", secs)?;
        }
        if let Some(n) = env_parse::<u32>("MAX_RETRIES")? {
            config.retry.max_attempts = n;
        }
        if let Some(secs) = env_parse::<f64>("BASE_RETRY_DELAY")? {
            config.retry.base_delay = secs_to_duration("BASE_RETRY_DELAY", secs)?;
        }
        if let Some(url) = env_var("ARIA2_RPC_URL") {
            config.aria2.rpc_url = url;
        }
        if let Some(secret) = env_var("ARIA2_SECRET") {
            config.aria2.secret = Some(secret);
        }
        if let Some(path) = env_var("MKVMERGE_PATH") {
            config.tools.mkvmerge_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_var("MKVEXTRACT_PATH") {
            config.tools.mkvextract_path = Some(PathBuf::from(path));
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            return Err(Error::config("UPDATE_INTERVAL", "must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("POLL_INTERVAL", "must be greater than zero"));
        }
        if self.status.page_size == 0 {
            return Err(Error::config("status.page_size", "must be greater than zero"));
        }
        if self.tools.command_timeout.is_zero() {
            return Err(Error::config(
                "tools.command_timeout",
                "must be greater than zero",
            ));
        }
        if url::Url::parse(&self.aria2.rpc_url).is_err() {
            return Err(Error::config(
                "ARIA2_RPC_URL",
                format!("not a valid URL: {}", self.aria2.rpc_url),
            ));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(key, format!("could not parse '{}'", raw))),
    }
}

fn secs_to_duration(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::config(key, format!("invalid number of seconds: {}", secs)))
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_nice_level() -> Option<i32> {
    Some(19)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_rpc_url() -> String {
    "http://localhost:6800/jsonrpc".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_page_size() -> usize {
    4
}

// Duration serialization helper (fractional seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
