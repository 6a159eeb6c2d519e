//! Configuration management for Rowcast

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::normalize::{TextNormalizer, DEFAULT_CHARSET};
use crate::types::{BackoffStrategy, NormalizationMode, QuotaPolicy};

/// Env var naming the config file
pub const CONFIG_ENV: &str = "ROWCAST_CONFIG";
/// Env var overriding `source.url`
pub const SOURCE_URL_ENV: &str = "ROWCAST_SOURCE_URL";
/// Env var holding the platform access token
pub const ACCESS_TOKEN_ENV: &str = "ROWCAST_ACCESS_TOKEN";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    pub platform: PlatformConfig,
    pub publish: PublishConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Connection URL (`mysql://...` or `sqlite://...`)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_text_column")]
    pub text_column: String,
    /// Charset of byte-valued text columns (`encoding_rs` label)
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default)]
    pub max_rows_per_run: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressBackend {
    #[default]
    File,
    Database,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub backend: ProgressBackend,
    /// Cursor file for the file backend
    #[serde(default)]
    pub path: Option<String>,
    /// Row key for the database backend
    #[serde(default = "default_progress_key")]
    pub key: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            backend: ProgressBackend::File,
            path: None,
            key: default_progress_key(),
        }
    }
}

impl ProgressConfig {
    /// Expanded cursor file path, falling back to the XDG data directory
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).to_string())),
            None => Ok(resolve_data_path()?.join("last_entry_id.txt")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformKind {
    Mastodon,
    DryRun,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub kind: PlatformKind,
    /// Instance host or URL (Mastodon only)
    #[serde(default)]
    pub instance: Option<String>,
    /// File holding the access token; `ROWCAST_ACCESS_TOKEN` takes precedence
    #[serde(default)]
    pub token_file: Option<String>,
}

impl PlatformConfig {
    pub fn expand_token_file_path(&self) -> Option<PathBuf> {
        self.token_file
            .as_ref()
            .map(|path| PathBuf::from(shellexpand::tilde(path).to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// No default: every deployment must pick 140, 280, 500...
    pub max_segment_length: usize,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub normalization: NormalizationMode,
    #[serde(default = "default_segment_delay", deserialize_with = "de_duration")]
    pub segment_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_limit")]
    pub limit: u32,
    #[serde(default = "default_quota_window", deserialize_with = "de_duration")]
    pub window: Duration,
    #[serde(default)]
    pub policy: QuotaPolicy,
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: default_quota_limit(),
            window: default_quota_window(),
            policy: QuotaPolicy::default(),
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff", deserialize_with = "de_duration")]
    pub backoff: Duration,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            strategy: BackoffStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval", deserialize_with = "de_duration")]
    pub poll_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_table() -> String {
    "comments".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_text_column() -> String {
    "text".to_string()
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

fn default_progress_key() -> String {
    "default".to_string()
}

fn default_prefix() -> String {
    "New entry added: ".to_string()
}

fn default_segment_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_quota_limit() -> u32 {
    50
}

fn default_quota_window() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Accepts humantime strings ("15m", "24h") or plain integer seconds
fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    /// Parse, apply environment overrides, and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(SOURCE_URL_ENV) {
            if !url.trim().is_empty() {
                self.source.url = Some(url);
            }
        }
    }

    /// The validated source URL
    pub fn source_url(&self) -> Result<&str> {
        self.source
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("source.url".to_string()).into())
    }

    /// Check everything that can be checked without touching the network
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<()> {
        self.source_url()?;

        for (field, value) in [
            ("source.table", &self.source.table),
            ("source.id_column", &self.source.id_column),
            ("source.text_column", &self.source.text_column),
        ] {
            if !is_valid_identifier(value) {
                return Err(ConfigError::invalid(
                    field,
                    format!("'{}' is not a plain SQL identifier", value),
                )
                .into());
            }
        }

        if self.source.max_rows_per_run == Some(0) {
            return Err(
                ConfigError::invalid("source.max_rows_per_run", "must be greater than 0").into(),
            );
        }

        TextNormalizer::new(self.publish.normalization, &self.source.charset)?;

        if self.publish.max_segment_length == 0 {
            return Err(ConfigError::invalid(
                "publish.max_segment_length",
                "must be greater than 0",
            )
            .into());
        }

        if self.quota.limit == 0 {
            return Err(ConfigError::invalid("quota.limit", "must be greater than 0").into());
        }

        if self.quota.window.is_zero() {
            return Err(ConfigError::invalid("quota.window", "must be longer than 0s").into());
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1").into());
        }

        if self.progress.backend == ProgressBackend::Database && self.progress.key.trim().is_empty()
        {
            return Err(ConfigError::MissingField("progress.key".to_string()).into());
        }

        if self.platform.kind == PlatformKind::Mastodon {
            if self.platform.instance.as_deref().map_or(true, |i| i.trim().is_empty()) {
                return Err(ConfigError::MissingField("platform.instance".to_string()).into());
            }

            let token_in_env = std::env::var(ACCESS_TOKEN_ENV).is_ok_and(|t| !t.trim().is_empty());
            if !token_in_env {
                match self.platform.expand_token_file_path() {
                    Some(path) if path.is_file() => {}
                    Some(path) if path.exists() => {
                        return Err(ConfigError::invalid(
                            "platform.token_file",
                            format!("{} is not a file", path.display()),
                        )
                        .into())
                    }
                    Some(path) => {
                        return Err(ConfigError::invalid(
                            "platform.token_file",
                            format!("{} does not exist", path.display()),
                        )
                        .into())
                    }
                    None => {
                        return Err(ConfigError::MissingField(format!(
                            "platform.token_file (or {})",
                            ACCESS_TOKEN_ENV
                        ))
                        .into())
                    }
                }
            }
        }

        Ok(())
    }
}

/// Table/column names are spliced into SQL, so only plain identifiers pass
pub fn is_valid_identifier(value: &str) -> bool {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
    });
    RE.is_match(value)
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("rowcast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("rowcast"))
}
