use anyhow::{ensure, Context, Result};
use conductor_directory::HttpDirectoryConfig;
use conductor_reconciler::{FailurePolicy, ReconcileSettings, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DIRECTORY_HOST_ENV: &str = "CONDUCTOR_DIRECTORY_HOST";
pub const DIRECTORY_TOKEN_ENV: &str = "CONDUCTOR_DIRECTORY_TOKEN";
pub const LOG_LEVEL_ENV: &str = "CONDUCTOR_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub name: String,
    pub logging: LoggingConfig,
    pub prometheus: PrometheusConfig,
    pub directory: DirectoryConfig,
    pub reconcile: ReconcileConfig,
    pub source: SourceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "scenarios-conductor".to_string(),
            logging: LoggingConfig::default(),
            prometheus: PrometheusConfig::default(),
            directory: DirectoryConfig::default(),
            reconcile: ReconcileConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Append log lines to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrometheusConfig {
    pub port: u16,
    pub disable: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            disable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    pub host: String,
    pub api_token: String,
    pub ping_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub page_size: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8000".to_string(),
            api_token: String::new(),
            ping_timeout_ms: 2_000,
            operation_timeout_ms: 30_000,
            page_size: 100,
        }
    }
}

impl DirectoryConfig {
    #[must_use]
    pub fn client_config(&self) -> HttpDirectoryConfig {
        HttpDirectoryConfig {
            host: self.host.clone(),
            api_token: self.api_token.clone(),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    pub call_timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub pair_concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let settings = ReconcileSettings::default();
        Self {
            call_timeout_ms: as_millis(settings.retry.call_timeout),
            max_attempts: settings.retry.max_attempts,
            initial_backoff_ms: as_millis(settings.retry.initial_backoff),
            max_backoff_ms: as_millis(settings.retry.max_backoff),
            pair_concurrency: settings.pair_concurrency,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                call_timeout: Duration::from_millis(self.call_timeout_ms),
            },
            pair_concurrency: self.pair_concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// JSON-lines file with event envelopes; stdin when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub max_redeliveries: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_redeliveries: 3,
        }
    }
}

impl AppConfig {
    /// Configuration used when no file is given.
    #[must_use]
    pub fn example() -> Self {
        let mut config = Self::default();
        config.directory.api_token = "change-me".to_string();
        config
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Loads `explicit`, else `$CONFIG_PATH`, else the example configuration, then
    /// applies environment overrides.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load(&path)?,
            None => Self::example(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies `CONDUCTOR_*` overrides looked up through `lookup`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(host) = lookup(DIRECTORY_HOST_ENV) {
            self.directory.host = host;
        }
        if let Some(token) = lookup(DIRECTORY_TOKEN_ENV) {
            self.directory.api_token = token;
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let reconcile = &self.reconcile;
        ensure!(reconcile.max_attempts > 0, "reconcile.max_attempts must be at least 1");
        ensure!(
            reconcile.pair_concurrency > 0,
            "reconcile.pair_concurrency must be at least 1"
        );
        ensure!(reconcile.call_timeout_ms > 0, "reconcile.call_timeout_ms must be positive");
        ensure!(
            reconcile.initial_backoff_ms <= reconcile.max_backoff_ms,
            "reconcile.initial_backoff_ms ({}) exceeds reconcile.max_backoff_ms ({})",
            reconcile.initial_backoff_ms,
            reconcile.max_backoff_ms
        );
        ensure!(
            self.directory.operation_timeout_ms > 0 && self.directory.ping_timeout_ms > 0,
            "directory timeouts must be positive"
        );
        ensure!(!self.directory.host.trim().is_empty(), "directory.host must be set");
        ensure!(self.directory.page_size > 0, "directory.page_size must be at least 1");
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
