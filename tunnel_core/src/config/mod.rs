//! Configuration management for tunnel_core.
//!
//! Runtime settings are loaded from a TOML file, then overridden from
//! `TUNNEL_CORE_*` environment variables. The file also carries the
//! tunnel records handed to [`crate::Tunnel::new`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::logging::{DEFAULT_BUFFER_CAPACITY, DiagnosticOptions};
use crate::storage::DirectoryStorage;
use crate::tunnel::{TunnelConfig, is_known_kind};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Logging settings, both process-wide and per-tunnel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Mirror diagnostic messages to the process log (default: debug builds only)
    #[serde(default = "default_console_echo")]
    pub console_echo: bool,

    /// External files directory for diagnostic reports (default: platform data dir)
    #[serde(default)]
    pub files_dir: Option<String>,

    /// Buffer capacity of each diagnostic report stream (default: 128 KiB)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Emit process logs as JSON (default: false)
    #[serde(default)]
    pub json_format: bool,

    /// Also write process logs to a rolling file (default: false)
    #[serde(default)]
    pub log_to_file: bool,

    /// Directory of the rolling process log (default: "./logs")
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_console_echo() -> bool {
    cfg!(debug_assertions)
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            console_echo: default_console_echo(),
            files_dir: None,
            buffer_capacity: default_buffer_capacity(),
            json_format: false,
            log_to_file: false,
            log_dir: default_log_dir(),
        }
    }
}

impl LoggingConfig {
    /// Options for the per-tunnel diagnostic loggers.
    pub fn diagnostic_options(&self) -> DiagnosticOptions {
        DiagnosticOptions {
            console_echo: self.console_echo,
            buffer_capacity: self.buffer_capacity,
        }
    }

    /// Storage for diagnostic reports: the configured directory, or the
    /// platform default when none is set.
    pub fn storage(&self) -> Option<DirectoryStorage> {
        match &self.files_dir {
            Some(dir) => Some(DirectoryStorage::new(dir)),
            None => DirectoryStorage::default_location(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tunnel records
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            logging: LoggingConfig::default(),
            tunnels: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Config::default()
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Environment variables take precedence over the file
        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "logging.buffer_capacity".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for tunnel in &self.tunnels {
            if tunnel.config_id.trim().is_empty() {
                return Err(ConfigError::MissingValue("tunnels.config_id".to_string()));
            }
            if !seen.insert(tunnel.config_id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "tunnels.config_id".to_string(),
                    message: format!("duplicate tunnel id {}", tunnel.config_id),
                });
            }
            if !is_known_kind(&tunnel.kind) {
                return Err(ConfigError::InvalidValue {
                    key: format!("tunnels.{}.kind", tunnel.config_id),
                    message: format!("unknown tunnel kind {}", tunnel.kind),
                });
            }
        }

        Ok(())
    }

    /// Look up a tunnel record by id
    pub fn tunnel(&self, config_id: &str) -> Option<&TunnelConfig> {
        self.tunnels.iter().find(|t| t.config_id == config_id)
    }

    /// Apply environment variable overrides (prefix: TUNNEL_CORE_)
    /// Keys:
    /// - TUNNEL_CORE_LOG_LEVEL
    /// - TUNNEL_CORE_LOGGING_CONSOLE_ECHO, TUNNEL_CORE_LOGGING_FILES_DIR,
    ///   TUNNEL_CORE_LOGGING_BUFFER_CAPACITY
    fn apply_env_overrides(cfg: &mut Config) {
        use std::env;

        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }

        if let Ok(v) = env::var("TUNNEL_CORE_LOG_LEVEL") {
            if !v.is_empty() {
                cfg.log_level = v;
            }
        }
        if let Ok(v) = env::var("TUNNEL_CORE_LOGGING_CONSOLE_ECHO") {
            if let Some(b) = parse_bool(&v) {
                cfg.logging.console_echo = b;
            }
        }
        if let Ok(v) = env::var("TUNNEL_CORE_LOGGING_FILES_DIR") {
            if !v.is_empty() {
                cfg.logging.files_dir = Some(v);
            }
        }
        if let Ok(v) = env::var("TUNNEL_CORE_LOGGING_BUFFER_CAPACITY") {
            if let Ok(n) = v.parse() {
                cfg.logging.buffer_capacity = n;
            }
        }
    }

    /// Reload configuration from the same file it was loaded from
    pub fn reload(&mut self, path: &Path) -> Result<(), ConfigError> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("tunnel_core").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

/// Configuration manager for handling configuration loading and reloading.
#[derive(Debug)]
pub struct ConfigManager {
    /// Current configuration
    config: Config,
    /// Path to the configuration file
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with the default configuration
    pub fn new() -> Self {
        ConfigManager {
            config: Config::default(),
            config_path: Config::default_path(),
        }
    }

    /// Load configuration from the specified path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path)?;

        Ok(ConfigManager {
            config,
            config_path: path,
        })
    }

    /// Get a reference to the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reload configuration from the current path
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.config.reload(&self.config_path)
    }

    /// Save the current configuration to the current path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.save(&self.config_path)
    }

    /// Get the current configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
