//! Application configuration.

use crate::error::{CoreError, CoreResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening an application context.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file. `None` opens a private in-memory database.
    pub database_path: Option<PathBuf>,

    /// Digits kept after the decimal point for float and currency fields
    /// that do not declare their own precision.
    pub float_precision: u32,

    /// Server mode stamps audit fields and only recomputes read-only or
    /// dependent formulas. Client mode also fills empty formula fields.
    pub is_server: bool,

    /// User recorded in `owner` / `modified_by`.
    pub session_user: String,

    /// Whether referential integrity is enforced.
    pub foreign_keys: bool,

    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,

    /// Number of change events kept for polling.
    pub change_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            float_precision: 2,
            is_server: true,
            session_user: "Administrator".to_string(),
            foreign_keys: true,
            busy_timeout: Duration::from_secs(5),
            change_history: 10_000,
        }
    }
}

/// On-disk shape of [`Config`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    float_precision: Option<u32>,
    is_server: Option<bool>,
    session_user: Option<String>,
    foreign_keys: Option<bool>,
    busy_timeout_ms: Option<u64>,
    change_history: Option<usize>,
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` for malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| CoreError::config(e.to_string()))?;
        let mut config = Self::default();
        if let Some(path) = file.database_path {
            config.database_path = Some(path);
        }
        if let Some(precision) = file.float_precision {
            config.float_precision = precision;
        }
        if let Some(is_server) = file.is_server {
            config.is_server = is_server;
        }
        if let Some(user) = file.session_user {
            config.session_user = user;
        }
        if let Some(enabled) = file.foreign_keys {
            config.foreign_keys = enabled;
        }
        if let Some(ms) = file.busy_timeout_ms {
            config.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(history) = file.change_history {
            config.change_history = history;
        }
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// `CoreError::Config` if it does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Sets the database file path.
    #[must_use]
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Uses an in-memory database.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.database_path = None;
        self
    }

    /// Sets the default float precision.
    #[must_use]
    pub const fn float_precision(mut self, digits: u32) -> Self {
        self.float_precision = digits;
        self
    }

    /// Sets server or client mode.
    #[must_use]
    pub const fn is_server(mut self, value: bool) -> Self {
        self.is_server = value;
        self
    }

    /// Sets the session user.
    #[must_use]
    pub fn session_user(mut self, user: impl Into<String>) -> Self {
        self.session_user = user.into();
        self
    }

    /// Sets whether foreign keys are enforced.
    #[must_use]
    pub const fn foreign_keys(mut self, value: bool) -> Self {
        self.foreign_keys = value;
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the change feed history size.
    #[must_use]
    pub const fn change_history(mut self, events: usize) -> Self {
        self.change_history = events;
        self
    }
}
