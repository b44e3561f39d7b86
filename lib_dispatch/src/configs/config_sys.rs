//! # Dispatcher Settings
//!
//! Layered configuration: built-in defaults, then an optional camelCase JSON
//! file, then environment variables (`DISPATCH_*`, `.env` honoured) and
//! command line flags. Later layers override earlier ones field by field.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::retry::BusinessRules;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "dispatch.conf.json";

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The config file could not be read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`Settings`].
    #[error("Config file {path} is malformed: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Command line / environment parsing failed.
    #[error(transparent)]
    Cli(#[from] clap::Error),

    /// A value is out of range.
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Storefront request dispatcher", version)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[clap(long, env = "DISPATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "DISPATCH_BASE_URL", help = "Backend base URL relative request paths are joined to.")]
    pub base_url: Option<String>,

    #[clap(long, env = "DISPATCH_MAX_CONCURRENT", help = "Maximum number of requests in flight.")]
    pub max_concurrent: Option<usize>,

    #[clap(long, env = "DISPATCH_TIMEOUT_MS", help = "Default per-attempt timeout in milliseconds.")]
    pub default_timeout_ms: Option<u64>,

    #[clap(long, env = "DISPATCH_MAX_RETRIES", help = "Default number of retries after the first attempt.")]
    pub default_max_retries: Option<u32>,

    #[clap(long, env = "DISPATCH_RETRY_BASE_DELAY_MS", help = "Base delay of the exponential backoff in milliseconds.")]
    pub retry_base_delay_ms: Option<u64>,

    #[clap(long, env = "DISPATCH_CACHE_TTL_MS", help = "Default response cache TTL in milliseconds.")]
    pub default_cache_ttl_ms: Option<u64>,

    #[clap(long, env = "DISPATCH_AUTH_REDIRECT_DELAY_MS", help = "Delay before the auth failure handler runs.")]
    pub auth_redirect_delay_ms: Option<u64>,

    #[clap(long, env = "DISPATCH_SIGN_SECRET", hide_env_values = true, help = "Signing secret used before login.")]
    pub default_sign_secret: Option<String>,

    #[clap(long, env = "DISPATCH_ENCRYPTION_KEY", hide_env_values = true, help = "Hex payload key used when no session key is installed.")]
    pub default_encryption_key: Option<String>,

    #[clap(long, env = "DISPATCH_BUSINESS_CODE_FIELD", help = "Response field carrying the business status code.")]
    pub business_code_field: Option<String>,

    #[clap(long, env = "DISPATCH_BUSINESS_SUCCESS_CODES", value_delimiter = ',', help = "Business codes meaning success.")]
    pub business_success_codes: Option<Vec<i64>>,

    #[clap(long, env = "DISPATCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "DISPATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DISPATCH_REDIS_URL", help = "Redis URL for persisted cache entries and token.")]
    pub redis_url: Option<String>,
}

impl Settings {
    /// Built-in defaults.
    pub fn defaults() -> Self {
        Settings {
            max_concurrent: Some(4),
            default_timeout_ms: Some(30_000),
            default_max_retries: Some(2),
            retry_base_delay_ms: Some(1_000),
            default_cache_ttl_ms: Some(5 * 60 * 1_000),
            auth_redirect_delay_ms: Some(1_500),
            default_sign_secret: Some("storefront-default-secret".to_string()),
            business_code_field: Some("code".to_string()),
            business_success_codes: Some(vec![0]),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    /// Reads a JSON settings file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merges two layers, where `other` overrides `self` for `Some` values.
    pub fn merge(self, other: Settings) -> Settings {
        Settings {
            config_path: other.config_path.or(self.config_path),
            base_url: other.base_url.or(self.base_url),
            max_concurrent: other.max_concurrent.or(self.max_concurrent),
            default_timeout_ms: other.default_timeout_ms.or(self.default_timeout_ms),
            default_max_retries: other.default_max_retries.or(self.default_max_retries),
            retry_base_delay_ms: other.retry_base_delay_ms.or(self.retry_base_delay_ms),
            default_cache_ttl_ms: other.default_cache_ttl_ms.or(self.default_cache_ttl_ms),
            auth_redirect_delay_ms: other.auth_redirect_delay_ms.or(self.auth_redirect_delay_ms),
            default_sign_secret: other.default_sign_secret.or(self.default_sign_secret),
            default_encryption_key: other.default_encryption_key.or(self.default_encryption_key),
            business_code_field: other.business_code_field.or(self.business_code_field),
            business_success_codes: other.business_success_codes.or(self.business_success_codes),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            redis_url: other.redis_url.or(self.redis_url),
        }
    }

    /// Rejects values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_concurrent == Some(0) {
            return Err(SettingsError::Invalid("maxConcurrent must be at least 1".into()));
        }
        if let Some(key) = &self.default_encryption_key {
            crate::core::crypto::parse_key(key)
                .map_err(|e| SettingsError::Invalid(format!("defaultEncryptionKey: {}", e)))?;
        }
        Ok(())
    }

    /// Requests allowed in flight at once (default 4).
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(4)
    }

    /// Per-attempt timeout when a request sets none (default 30 s).
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.unwrap_or(30_000))
    }

    /// Retries after the first attempt (default 2).
    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries.unwrap_or(2)
    }

    /// Backoff unit for the first retry (default 1 s).
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.unwrap_or(1_000))
    }

    /// Cache lifetime when a request enables caching without a TTL (default 5 min).
    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.default_cache_ttl_ms.unwrap_or(300_000))
    }

    /// Wait before the auth failure handler runs (default 1.5 s).
    pub fn auth_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.auth_redirect_delay_ms.unwrap_or(1_500))
    }

    /// Boot signing secret, empty when unset.
    pub fn sign_secret(&self) -> String {
        self.default_sign_secret.clone().unwrap_or_default()
    }

    /// Business code rules for the retry policy.
    pub fn business_rules(&self) -> BusinessRules {
        let defaults = BusinessRules::default();
        BusinessRules {
            code_field: self.business_code_field.clone().unwrap_or(defaults.code_field),
            success_codes: self
                .business_success_codes
                .clone()
                .unwrap_or(defaults.success_codes),
        }
    }
}

/// Loads settings from defaults, the config file, `.env`, environment and `args`.
///
/// `args` includes the program name, as with `std::env::args_os()`.
pub fn load_settings_from<I, T>(args: I) -> Result<Settings, SettingsError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();

    let cli = Settings::try_parse_from(args)?;
    resolve_settings(cli)
}

/// Layers defaults, the config file and already-parsed CLI/env values.
///
/// Binaries that flatten [`Settings`] into their own argument struct call
/// this directly; `.env` must already be loaded when `cli` was parsed.
pub fn resolve_settings(cli: Settings) -> Result<Settings, SettingsError> {
    let mut settings = Settings::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        settings = settings.merge(Settings::from_file(&config_file_path)?);
    } else if cli.config_path.is_some() {
        return Err(SettingsError::Io {
            path: config_file_path,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        });
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    settings = settings.merge(cli);
    settings.validate()?;
    Ok(settings)
}

/// [`load_settings_from`] with the process arguments.
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(std::env::args_os())
}
