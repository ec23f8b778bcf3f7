//! Strand configuration system
//!
//! A [`Config`] is resolved once, when a runtime is created, and never changes
//! afterwards. Every component receives it by reference.
//!
//! # Resolution
//!
//! ```text
//! Priority (high → low):
//! 1. Explicit builder calls / CLI arguments
//! 2. Values present in a config file (strand.toml)
//! 3. Defaults of the selected environment
//! ```
//!
//! # Usage
//!
//! ```rust
//! use strand::util::config::{Config, Environment};
//!
//! let config = Config::builder(Environment::Development)
//!     .purge_tasks_when_runaway_detected(false)
//!     .runaway_threshold(10)
//!     .build();
//! assert!(config.validate_subscriptions());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::util::logger::LoggerKind;

/// Default bound on consecutive yields before a task counts as runaway.
pub const DEFAULT_RUNAWAY_THRESHOLD: u32 = 100;

/// Default bound on the number of ticks a single `drain()` may run.
pub const DEFAULT_MAX_DRAIN_TICKS: usize = 10_000;

/// Deployment environment. Gates diagnostic-only behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl fmt::Display for Environment {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    environment: Environment,
    enable_names: bool,
    validate_subscriptions: bool,
    purge_tasks_when_runaway_detected: bool,
    enable_uncaught_error_handlers: bool,
    logger: LoggerKind,
    runaway_threshold: u32,
    max_drain_ticks: usize,
}

impl Config {
    /// Defaults for production builds.
    pub fn production() -> Self {
        ConfigBuilder::new(Environment::Production).build()
    }

    /// Defaults for development builds: names and validation on.
    pub fn development() -> Self {
        ConfigBuilder::new(Environment::Development).build()
    }

    /// Start from the defaults of `environment`.
    #[inline]
    pub fn builder(environment: Environment) -> ConfigBuilder {
        ConfigBuilder::new(environment)
    }

    /// Parse a TOML document. Missing keys take the environment's defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.resolve())
    }

    #[inline]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[inline]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    #[inline]
    pub fn is_development(&self) -> bool {
        !self.is_production()
    }

    #[inline]
    pub fn enable_names(&self) -> bool {
        self.enable_names
    }

    #[inline]
    pub fn validate_subscriptions(&self) -> bool {
        self.validate_subscriptions
    }

    #[inline]
    pub fn purge_tasks_when_runaway_detected(&self) -> bool {
        self.purge_tasks_when_runaway_detected
    }

    #[inline]
    pub fn enable_uncaught_error_handlers(&self) -> bool {
        self.enable_uncaught_error_handlers
    }

    #[inline]
    pub fn logger(&self) -> LoggerKind {
        self.logger
    }

    #[inline]
    pub fn runaway_threshold(&self) -> u32 {
        self.runaway_threshold
    }

    #[inline]
    pub fn max_drain_ticks(&self) -> usize {
        self.max_drain_ticks
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::production()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder seeded with the defaults of `environment`.
    pub fn new(environment: Environment) -> Self {
        let development = environment == Environment::Development;
        Self {
            config: Config {
                environment,
                enable_names: development,
                validate_subscriptions: development,
                purge_tasks_when_runaway_detected: true,
                enable_uncaught_error_handlers: true,
                logger: LoggerKind::Console,
                runaway_threshold: DEFAULT_RUNAWAY_THRESHOLD,
                max_drain_ticks: DEFAULT_MAX_DRAIN_TICKS,
            },
        }
    }

    pub fn enable_names(
        mut self,
        value: bool,
    ) -> Self {
        self.config.enable_names = value;
        self
    }

    pub fn validate_subscriptions(
        mut self,
        value: bool,
    ) -> Self {
        self.config.validate_subscriptions = value;
        self
    }

    pub fn purge_tasks_when_runaway_detected(
        mut self,
        value: bool,
    ) -> Self {
        self.config.purge_tasks_when_runaway_detected = value;
        self
    }

    pub fn enable_uncaught_error_handlers(
        mut self,
        value: bool,
    ) -> Self {
        self.config.enable_uncaught_error_handlers = value;
        self
    }

    pub fn logger(
        mut self,
        kind: LoggerKind,
    ) -> Self {
        self.config.logger = kind;
        self
    }

    /// Threshold must be at least 1; zero is clamped.
    pub fn runaway_threshold(
        mut self,
        threshold: u32,
    ) -> Self {
        self.config.runaway_threshold = threshold.max(1);
        self
    }

    /// Bound must be at least 1; zero is clamped.
    pub fn max_drain_ticks(
        mut self,
        ticks: usize,
    ) -> Self {
        self.config.max_drain_ticks = ticks.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// On-disk shape of a config file. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub enable_names: Option<bool>,
    #[serde(default)]
    pub validate_subscriptions: Option<bool>,
    #[serde(default)]
    pub purge_tasks_when_runaway_detected: Option<bool>,
    #[serde(default)]
    pub enable_uncaught_error_handlers: Option<bool>,
    #[serde(default)]
    pub logger: Option<LoggerKind>,
    #[serde(default)]
    pub runaway_threshold: Option<u32>,
    #[serde(default)]
    pub max_drain_ticks: Option<usize>,
}

impl ConfigFile {
    /// Fill the gaps with the environment's defaults.
    pub fn resolve(&self) -> Config {
        self.apply(ConfigBuilder::new(self.environment.unwrap_or_default()))
            .build()
    }

    /// Apply the keys present in this file on top of `builder`.
    pub fn apply(
        &self,
        mut builder: ConfigBuilder,
    ) -> ConfigBuilder {
        if let Some(value) = self.enable_names {
            builder = builder.enable_names(value);
        }
        if let Some(value) = self.validate_subscriptions {
            builder = builder.validate_subscriptions(value);
        }
        if let Some(value) = self.purge_tasks_when_runaway_detected {
            builder = builder.purge_tasks_when_runaway_detected(value);
        }
        if let Some(value) = self.enable_uncaught_error_handlers {
            builder = builder.enable_uncaught_error_handlers(value);
        }
        if let Some(kind) = self.logger {
            builder = builder.logger(kind);
        }
        if let Some(threshold) = self.runaway_threshold {
            builder = builder.runaway_threshold(threshold);
        }
        if let Some(ticks) = self.max_drain_ticks {
            builder = builder.max_drain_ticks(ticks);
        }
        builder
    }
}

/// Read a config file from disk.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Read and resolve a config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_file(path).map(|file| file.resolve())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
