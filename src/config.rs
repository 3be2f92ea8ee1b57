//! Configuration System
//!
//! Snapshotter configuration with layered sources: built-in defaults, an
//! optional TOML file, then `LAZYSNAP_*` environment variables (nested keys
//! use `__`, e.g. `LAZYSNAP_LOGGING__LEVEL=debug`).

use crate::error::SnapshotError;
use crate::logging::LoggingConfig;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "LAZYSNAP";
const DEFAULT_ROOT: &str = "/var/lib/lazysnap";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotterConfig {
    /// Snapshotter state directory
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Defer directory reclamation on remove to the next cleanup pass
    #[serde(default)]
    pub async_remove: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT)
}

impl Default for SnapshotterConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            async_remove: false,
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Root(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Root(msg) => write!(f, "root: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl SnapshotterConfig {
    /// Configuration rooted at `root` with every other field defaulted
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_async_remove(mut self, async_remove: bool) -> Self {
        self.async_remove = async_remove;
        self
    }

    /// Load from defaults, an optional file, and the environment.
    ///
    /// A file given explicitly must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, SnapshotError> {
        let mut builder = builder_with_defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SnapshotterConfig = builder.build()?.try_deserialize()?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// [`validate`](Self::validate), folded into a single error.
    pub fn ensure_valid(&self) -> Result<(), SnapshotError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            SnapshotError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.root.as_os_str().is_empty() {
            errors.push(ValidationError::Root("must not be empty".to_string()));
        } else if !self.root.is_absolute() {
            errors.push(ValidationError::Root(format!(
                "must be an absolute path, got {}",
                self.root.display()
            )));
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, SnapshotError> {
        toml::to_string_pretty(self).map_err(|e| SnapshotError::ConfigError(e.to_string()))
    }
}

fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, SnapshotError> {
    Ok(Config::builder()
        .set_default("root", DEFAULT_ROOT)?
        .set_default("async_remove", false)?)
}
