//! Configuration loading for the formagent client.
//!
//! `api_base_url` is required. Every other section has defaults so a minimal
//! file only names the API; values that are present are validated strictly.

use crate::draft::HydrationPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    #[serde(default = "default_login_route")]
    pub login_route: String,
    /// Per-request timeout. Absent means the transport default.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Where access/refresh tokens are persisted. Absent keeps them in memory.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub stale_time_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutosaveConfig {
    pub debounce_ms: u64,
    /// Persist a pending autosave when an editor is closed explicitly.
    pub flush_on_close: bool,
    pub hydration: HydrationPolicy,
    pub retry: RetryConfig,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 3_000,
            flush_on_close: true,
            hydration: HydrationPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Backoff for failed autosaves.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_ms: 1_000,
            max_ms: 15_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl RetryConfig {
    /// Wait before retry `n` (1 after the first failure), before jitter.
    /// Grows by `multiplier` per retry and never exceeds `max_ms`.
    pub fn base_delay(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(scaled.min(self.max_ms as f64) as u64)
    }

    /// [`base_delay`](Self::base_delay) plus up to `jitter_ms` of random spread.
    pub fn delay(&self, n: u32) -> Duration {
        let spread = match self.jitter_ms {
            0 => 0,
            // The low bits of a v7 id are random.
            jitter => (uuid::Uuid::now_v7().as_u128() as u64) % jitter,
        };
        self.base_delay(n) + Duration::from_millis(spread)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "formagent_client=info,warn".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither `--config <path>` nor `FORMAGENT_CONFIG` named a file.
    #[error("no client config given; pass --config <path> or set FORMAGENT_CONFIG")]
    NotLocated,
    #[error("cannot read client config: {0}")]
    Read(#[from] std::io::Error),
    #[error("client config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Environment variable consulted when `--config` is absent.
pub const CONFIG_ENV: &str = "FORMAGENT_CONFIG";

fn default_login_route() -> String {
    "/login".to_string()
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl ClientConfig {
    /// Configuration with defaults for everything but the API location.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            login_route: default_login_route(),
            request_timeout_ms: None,
            credentials_path: None,
            downloads_dir: default_downloads_dir(),
            cache: CacheConfig::default(),
            autosave: AutosaveConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Locate, parse and validate the process configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let path = locate(std::env::args().skip(1), std::env::var_os(CONFIG_ENV))?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must use http:// or https://".to_string(),
            });
        }
        if !self.login_route.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "login_route",
                reason: "must be an absolute route starting with '/'".to_string(),
            });
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0 when set".to_string(),
            });
        }
        if self.downloads_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "downloads_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "autosave.debounce_ms",
                reason: "must be > 0".to_string(),
            });
        }
        let retry = &self.autosave.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "autosave.retry.max_attempts",
                reason: "must be >= 1".to_string(),
            });
        }
        if retry.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "autosave.retry.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if retry.max_ms < retry.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "autosave.retry.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        // Written so NaN fails too.
        if !(retry.multiplier >= 1.0 && retry.multiplier.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "autosave.retry.multiplier",
                reason: format!("must be a finite number >= 1.0, got {}", retry.multiplier),
            });
        }
        if self.telemetry.filter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "telemetry.filter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// `--config <path>` wins over the environment value.
pub fn locate(
    args: impl IntoIterator<Item = String>,
    env: Option<std::ffi::OsString>,
) -> Result<PathBuf, ConfigError> {
    let from_args = args
        .into_iter()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from);
    from_args
        .or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .ok_or(ConfigError::NotLocated)
}
