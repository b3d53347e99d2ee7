//! Configuration management for qsso
//!
//! Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/qsso/config.toml`
//! - macOS: `~/Library/Application Support/dev.qsso.qsso/config.toml`
//! - Windows: `%APPDATA%\qsso\qsso\config\config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the SSO cache directory.
pub const SSO_CACHE_DIR_ENV: &str = "AWS_SSO_CACHE_DIR";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// qsso configuration
///
/// # Example TOML
///
/// ```toml
/// [server]
/// command = "aws-lsp-codewhisperer"
/// args = ["--stdio"]
/// request_timeout_seconds = 0  # 0 = no timeout
///
/// [client]
/// client_name = "qsso"
/// profile_name = "amazonq"
///
/// [storage]
/// state_path = ""     # Empty = default location
/// sso_cache_dir = ""  # Empty = $AWS_SSO_CACHE_DIR or ~/.aws/sso/cache
///
/// [output]
/// format = "table"  # "table" | "json" | "quiet"
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Language server process
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity presented to the server
    #[serde(default)]
    pub client: ClientConfig,

    /// On-disk state
    #[serde(default)]
    pub storage: StorageConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Language server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to launch
    #[serde(default = "default_server_command")]
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default = "default_server_args")]
    pub args: Vec<String>,

    /// Per-request timeout in seconds (0 = wait indefinitely)
    #[serde(default)]
    pub request_timeout_seconds: u64,
}

fn default_server_command() -> String {
    "aws-lsp-codewhisperer".to_string()
}

fn default_server_args() -> Vec<String> {
    vec!["--stdio".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_server_command(),
            args: default_server_args(),
            request_timeout_seconds: 0,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0).then(|| Duration::from_secs(self.request_timeout_seconds))
    }
}

/// Client identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Requester identity sent with token requests
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Profile the SSO connection is registered under
    #[serde(default = "default_profile_name")]
    pub profile_name: String,
}

fn default_client_name() -> String {
    "qsso".to_string()
}

fn default_profile_name() -> String {
    "amazonq".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            profile_name: default_profile_name(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the state file (empty = default location)
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// SSO cache directory (empty = environment or home default)
    #[serde(default)]
    pub sso_cache_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured state path, else `state.json` in the data directory.
    pub fn resolve_state_path(&self) -> Option<PathBuf> {
        non_empty(&self.state_path).or_else(|| Config::data_dir().map(|dir| dir.join("state.json")))
    }

    /// Configured cache dir, else `$AWS_SSO_CACHE_DIR`, else `~/.aws/sso/cache`.
    pub fn resolve_sso_cache_dir(&self) -> Option<PathBuf> {
        non_empty(&self.sso_cache_dir)
            .or_else(|| {
                std::env::var_os(SSO_CACHE_DIR_ENV)
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from)
            })
            .or_else(|| {
                directories::BaseDirs::new()
                    .map(|dirs| dirs.home_dir().join(".aws").join("sso").join("cache"))
            })
    }
}

fn non_empty(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "table", "json", "quiet"
    #[serde(default = "default_format")]
    pub format: String,

    /// Verbose output
    #[serde(default)]
    pub verbose: bool,
}

fn default_format() -> String {
    "table".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            verbose: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            Self::load(path)
        } else {
            Self::load_default()
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("dev", "qsso", "qsso")
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path (for the state file)
    pub fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        if let Some(path) = Self::default_path() {
            if !path.exists() {
                Self::default().save(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.command must not be empty".to_string(),
            ));
        }

        if self.client.client_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "client.client_name must not be empty".to_string(),
            ));
        }

        if self.client.profile_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "client.profile_name must not be empty".to_string(),
            ));
        }

        let valid_formats = ["table", "json", "quiet"];
        if !valid_formats.contains(&self.output.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid output format '{}'. Valid values: {:?}",
                self.output.format, valid_formats
            )));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }

    /// Generate a sample configuration file content
    pub fn sample_toml() -> &'static str {
        r#"# qsso configuration

[server]
# Language server executable and arguments
command = "aws-lsp-codewhisperer"
args = ["--stdio"]
# Per-request timeout in seconds, 0 waits indefinitely (interactive logins can take minutes)
request_timeout_seconds = 0

[client]
# Requester identity sent with token requests
client_name = "qsso"
# Profile the SSO connection is registered under
profile_name = "amazonq"

[storage]
# Path to the state file (empty = default location)
# state_path = ""
# SSO cache directory (empty = $AWS_SSO_CACHE_DIR or ~/.aws/sso/cache)
# sso_cache_dir = ""

[output]
# Output format: "table", "json", "quiet"
format = "table"
verbose = false

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "warn"
"#
    }
}

/// CLI configuration overrides
///
/// Command-line arguments take precedence over config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Output format override
    pub output_format: Option<String>,
    /// Verbose flag override
    pub verbose: Option<bool>,
    /// Debug flag override
    pub debug: Option<bool>,
    /// Language server executable override
    pub server_command: Option<String>,
    /// Profile name override
    pub profile_name: Option<String>,
}

impl Config {
    /// Apply CLI overrides to configuration
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref format) = overrides.output_format {
            self.output.format = format.clone();
        }
        if let Some(verbose) = overrides.verbose {
            self.output.verbose = verbose;
        }
        if let Some(true) = overrides.debug {
            self.logging.level = "debug".to_string();
        }
        if let Some(ref command) = overrides.server_command {
            self.server.command = command.clone();
        }
        if let Some(ref profile) = overrides.profile_name {
            self.client.profile_name = profile.clone();
        }
        self
    }
}
