/*!
 * Configuration for the devrelay device manager.
 *
 * Settings are layered: compiled-in defaults, then an optional file, then
 * `DEVRELAY__`-prefixed environment variables.
 */
use std::path::Path;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level devrelay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Device manager configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "devrelay_server=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Device manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Protocol spec version used to filter advertised device messages.
    /// Normally overwritten with the version negotiated at handshake.
    #[serde(default = "default_spec_version")]
    pub spec_version: u32,

    /// Capacity of the outbound event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Whether the first scan may lazily construct registered backends
    #[serde(default = "default_auto_load")]
    pub auto_load: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            spec_version: default_spec_version(),
            event_capacity: default_event_capacity(),
            auto_load: default_auto_load(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_spec_version() -> u32 {
    2
}

fn default_event_capacity() -> usize {
    256
}

fn default_auto_load() -> bool {
    true
}

/// A builder layering configuration sources
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix (separator is `__`)
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let default_config = Config::default();
        let mut builder = ConfigLib::builder().add_source(
            config::Config::try_from(&default_config)
                .map_err(|e| Error::config(format!("failed to create default config: {e}")))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                builder = builder.add_source(File::with_name(&config_file));
            } else {
                debug!(
                    "Configuration file {} does not exist, using defaults",
                    config_file
                );
            }
        }

        if let Some(prefix) = self.environment_prefix {
            builder = builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let merged = builder
            .build()
            .map_err(|e| Error::config(format!("failed to build configuration: {e}")))?;

        merged
            .try_deserialize()
            .map_err(|e| Error::config(format!("failed to deserialize configuration: {e}")))
    }
}
