use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use secmaster_core::DEFAULT_SCHEME;

/// Configuration for a security master.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. Environment variables (SECMASTER_* prefix, highest priority)
/// 2. Config file (~/.config/secmaster/config.toml)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Path to the SQLite database.
    ///
    /// Can be set via:
    /// - ENV: SECMASTER_DATABASE_PATH
    /// - Config: database_path = "/path/to/db"
    /// - Default: ~/.local/share/secmaster/secmaster.db
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,

    /// Scheme of every object and unique id issued by the master.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// How often a modification is retried after lock contention.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// How long a writer waits for another connection's lock, per attempt.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            scheme: default_scheme(),
            max_retries: default_max_retries(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl MasterConfig {
    /// Load configuration from file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("secmaster");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;
        log::debug!("loaded config {config:?}");
        Ok(config)
    }

    /// Load configuration, then point it at a specific database.
    pub fn load_with_db_path(db_path: PathBuf) -> Result<Self> {
        let mut config = Self::load()?;
        config.database_path = db_path;
        Ok(config)
    }

    /// Defaults for a database at `db_path`, ignoring file and environment.
    #[must_use]
    pub fn for_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Create the directory that will hold the database file.
    pub fn ensure_database_dir(&self) -> Result<()> {
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("secmaster")
        .join("secmaster.db")
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

const fn default_max_retries() -> usize {
    10
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/secmaster/config.toml
/// - macOS: ~/Library/Application Support/secmaster/config.toml
/// - Windows: %APPDATA%\secmaster\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("secmaster")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Security master configuration
#
# Environment variables (SECMASTER_* prefix) override this file.

# Path to the SQLite database holding the bitemporal history
#
# Can also be set via:
# - Environment: SECMASTER_DATABASE_PATH=/custom/path.db
#
# Default: Platform-specific data directory
#database_path = "/path/to/custom/secmaster.db"

# Scheme of the identifiers issued by this master
scheme = "DbSec"

# Retries of a modification that hit a locked database
max_retries = 10

# Milliseconds a writer waits for a lock before giving up an attempt
busy_timeout_ms = 5000
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;
    log::info!("wrote default config to {}", config_path.display());

    Ok(true)
}
