//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/lln-host/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use lln_command_api::{BuildOptions, DispatchOptions};
use lln_runtime::EngineLocator;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Shim build settings
    #[serde(default)]
    pub build: BuildOptions,
    /// Engine library discovery
    #[serde(default)]
    pub engine: EngineLocator,
    /// Statement dispatch policies
    #[serde(default)]
    pub dispatch: DispatchOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset (trace, debug, info, warn, error)
    /// Default: "info"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create(&config_path)
    }

    /// Load `path`, writing the documented default there first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::create_default_file(path)?;
        }
        Self::load(path)
    }

    /// Returns `$XDG_CONFIG_HOME/lln-host/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "lln-host")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    pub fn default_config_content() -> &'static str {
        r#"# lln-host configuration

[logging]
# Log level used when RUST_LOG is not set: trace, debug, info, warn, error
level = "info"

[build]
# Directory holding the generated shim, the compiled plugin and the
# fingerprint marker. Relative paths are resolved against the working
# directory.
dir = "lln_build"

# C compiler used for the shim. When unset, $CC is used, then "cc".
# compiler = "cc"

# Extra flags passed before "-fPIC -shared"
flags = []

[engine]
# Explicit path to the engine library. When unset, LLN_ENGINE_LIBRARY,
# the platform library path and the system library directories are
# searched in that order.
# library = "/usr/local/lib/liblln.so"

# Let the dynamic loader search on its own when no file was found
loader_fallback = true

[dispatch]
# What to do with statements naming an unknown command or passing
# arguments that do not fit: "lenient" reports and skips, "strict" aborts
unknown_command = "lenient"

# What to do with statements the engine could not parse: "skip" or "abort"
malformed = "skip"
"#
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid logging.level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.build.dir.as_os_str().is_empty() {
            anyhow::bail!("build.dir must not be empty");
        }

        if let Some(compiler) = &self.build.compiler {
            if compiler.trim().is_empty() {
                anyhow::bail!("build.compiler must not be empty when set");
            }
        }

        if let Some(library) = &self.engine.library {
            if library.as_os_str().is_empty() {
                anyhow::bail!("engine.library must not be empty when set");
            }
        }

        Ok(())
    }
}
