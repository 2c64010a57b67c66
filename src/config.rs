//! Client configuration: backend address, wire options and poll cadence.
//!
//! Settings come from `config.toml` in the app directory. The backend URL is
//! taken from `--api-url`, then `DISHLAB_API_URL`, then the file; when none is
//! set it falls back to the loopback default and logs a warning.
//!
//! Config keys (TOML): `[api]` `base_url`, `epochs_encoding`,
//! `request_timeout_secs`, `max_response_bytes`; `[polling]`
//! `idle_interval_secs`, `active_interval_secs`, `training_watch_ceiling_secs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::app_dirs;

/// Default filename used to store the client configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Environment variable that overrides the backend URL.
pub const API_URL_ENV: &str = "DISHLAB_API_URL";
/// Origin label for URLs given with `--api-url`.
pub const CLI_URL_ORIGIN: &str = "--api-url";
/// Backend address used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_IDLE_INTERVAL_SECS: u64 = 30;
const DEFAULT_ACTIVE_INTERVAL_SECS: u64 = 5;
const DEFAULT_TRAINING_WATCH_CEILING_SECS: u64 = 15 * 60;

/// How the epoch count travels on training-start requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochsEncoding {
    /// `?epochs=N` query parameter.
    #[default]
    Query,
    /// `{"epochs": N}` JSON body.
    JsonBody,
}

/// On-disk shape of `config.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub api: ApiFileSettings,
    #[serde(default)]
    pub polling: PollingFileSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiFileSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub epochs_encoding: EpochsEncoding,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for ApiFileSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            epochs_encoding: EpochsEncoding::default(),
            request_timeout_secs: None,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollingFileSettings {
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_active_interval_secs")]
    pub active_interval_secs: u64,
    #[serde(default = "default_training_watch_ceiling_secs")]
    pub training_watch_ceiling_secs: u64,
}

impl Default for PollingFileSettings {
    fn default() -> Self {
        Self {
            idle_interval_secs: DEFAULT_IDLE_INTERVAL_SECS,
            active_interval_secs: DEFAULT_ACTIVE_INTERVAL_SECS,
            training_watch_ceiling_secs: DEFAULT_TRAINING_WATCH_CEILING_SECS,
        }
    }
}

/// Where the effective backend URL came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseUrlSource {
    CommandLine,
    Environment,
    ConfigFile,
    Default,
}

/// Resolved transport settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiSettings {
    pub base_url: Url,
    pub epochs_encoding: EpochsEncoding,
    /// Whole-request timeout; `None` leaves requests unbounded after connect.
    pub request_timeout: Option<Duration>,
    pub max_response_bytes: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            epochs_encoding: EpochsEncoding::default(),
            request_timeout: None,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

/// Resolved poll cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollingSettings {
    pub idle_interval: Duration,
    pub active_interval: Duration,
    /// Upper bound on a watch loop started by an explicit training start.
    pub training_watch_ceiling: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        PollingFileSettings::default().resolve()
    }
}

impl PollingFileSettings {
    /// Clamp to at least one second and keep the active cadence no slower than idle.
    fn resolve(&self) -> PollingSettings {
        let active = self.active_interval_secs.max(1);
        let idle = self.idle_interval_secs.max(active);
        PollingSettings {
            idle_interval: Duration::from_secs(idle),
            active_interval: Duration::from_secs(active),
            training_watch_ceiling: Duration::from_secs(self.training_watch_ceiling_secs.max(1)),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub api: ApiSettings,
    pub polling: PollingSettings,
    pub base_url_source: BaseUrlSource,
}

/// Errors that may occur while loading or saving the client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("Invalid backend URL '{url}' from {origin}: {reason}")]
    InvalidBaseUrl {
        url: String,
        origin: &'static str,
        reason: String,
    },
    #[error("No suitable config directory found")]
    NoConfigDir,
}

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.file(CONFIG_FILE_NAME))
}

/// The app directory holding `config.toml`, with where it was found.
pub fn app_dir() -> Result<app_dirs::AppDir, ConfigError> {
    app_dirs::AppDir::locate().map_err(map_app_dir_error)
}

/// Load configuration from the app directory and the environment, letting
/// `cli_url` override both.
pub fn load(cli_url: Option<&str>) -> Result<ClientConfig, ConfigError> {
    let path = config_path()?;
    let file = load_file_from(&path)?;
    resolve(&file, std::env::var(API_URL_ENV).ok(), cli_url)
}

/// Read `config.toml`, returning defaults when it does not exist.
pub fn load_file_from(path: &Path) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist `file` to `path`, creating parent directories as needed.
pub fn save_file_to(file: &ConfigFile, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(file).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, data).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Combine file settings with optional environment and command-line URLs.
///
/// Precedence: command line, environment, file, then the loopback default.
/// Only the winning URL is parsed, so a broken lower-precedence value never
/// blocks an explicit override.
pub fn resolve(
    file: &ConfigFile,
    env_url: Option<String>,
    cli_url: Option<&str>,
) -> Result<ClientConfig, ConfigError> {
    let (base_url, base_url_source) = select_base_url(file, env_url.as_deref(), cli_url)?;
    Ok(ClientConfig {
        api: ApiSettings {
            base_url,
            epochs_encoding: file.api.epochs_encoding,
            request_timeout: file
                .api
                .request_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            max_response_bytes: file.api.max_response_bytes.max(1024),
        },
        polling: file.polling.resolve(),
        base_url_source,
    })
}

fn select_base_url(
    file: &ConfigFile,
    env_url: Option<&str>,
    cli_url: Option<&str>,
) -> Result<(Url, BaseUrlSource), ConfigError> {
    let given = |url: Option<&str>| url.filter(|url| !url.trim().is_empty()).map(str::to_owned);
    if let Some(url) = given(cli_url) {
        return Ok((parse_base_url(&url, CLI_URL_ORIGIN)?, BaseUrlSource::CommandLine));
    }
    if let Some(url) = given(env_url) {
        return Ok((parse_base_url(&url, API_URL_ENV)?, BaseUrlSource::Environment));
    }
    if let Some(url) = given(file.api.base_url.as_deref()) {
        return Ok((parse_base_url(&url, CONFIG_FILE_NAME)?, BaseUrlSource::ConfigFile));
    }
    tracing::warn!(
        "No backend URL configured (pass {CLI_URL_ORIGIN}, set {API_URL_ENV} or api.base_url); using {DEFAULT_BASE_URL}"
    );
    Ok((default_base_url(), BaseUrlSource::Default))
}

/// Parse and check a backend URL; only `http` and `https` are accepted.
pub fn parse_base_url(raw: &str, origin: &'static str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let invalid = |reason: String| ConfigError::InvalidBaseUrl {
        url: trimmed.to_string(),
        origin,
        reason,
    };
    let url = Url::parse(trimmed).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".into()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query strings and fragments are not allowed".into()));
    }
    Ok(url)
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
}

fn default_max_response_bytes() -> usize {
    DEFAULT_MAX_RESPONSE_BYTES
}

fn default_idle_interval_secs() -> u64 {
    DEFAULT_IDLE_INTERVAL_SECS
}

fn default_active_interval_secs() -> u64 {
    DEFAULT_ACTIVE_INTERVAL_SECS
}

fn default_training_watch_ceiling_secs() -> u64 {
    DEFAULT_TRAINING_WATCH_CEILING_SECS
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            ConfigError::CreateDir { path, source }
        }
    }
}
