//! Configuration management for roster.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Uncased, UncasedStr},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "roster";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "roster.db";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "ROSTER_";

/// Unprefixed variables carried over from older deployments.
const LEGACY_ENV_VARS: &[&str] = &["API_URL", "API_KEY", "API_FROM", "FLASKY_ADMIN"];

/// Address notified when a submitter opts in.
pub const DEFAULT_SECONDARY_ADDRESS: &str = "flaskaulasweb@zohomail.com";

/// Tag prepended to every subject line.
pub const DEFAULT_SUBJECT_PREFIX: &str = "[Flasky]";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables prefixed with `ROSTER_`, `__` separating sections
/// 2. The legacy variables `API_URL`, `API_KEY`, `API_FROM`, `FLASKY_ADMIN`
/// 3. TOML config file at `~/.config/roster/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Mail provider and recipient configuration.
    pub mail: MailConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/roster/roster.db`
    pub database_path: Option<PathBuf>,
    /// How long a write waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

/// Mail-related configuration.
///
/// Addresses left empty are still handed to the provider, which may reject
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Provider endpoint receiving the form POST.
    pub api_url: String,
    /// Basic-auth user name.
    pub api_user: String,
    /// Basic-auth password (the provider API key).
    pub api_key: String,
    /// Sender address.
    pub from_address: String,
    /// Administrator notified of every registration.
    pub admin_address: String,
    /// Tag prepended to subjects.
    pub subject_prefix: String,
    /// Extra address added when the submitter opts in.
    pub secondary_address: String,
    /// Provider request timeout in milliseconds.
    pub timeout_ms: u64,
    /// User agent sent to the provider.
    pub user_agent: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_user: "api".to_string(),
            api_key: String::new(),
            from_address: String::new(),
            admin_address: String::new(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            secondary_address: DEFAULT_SECONDARY_ADDRESS.to_string(),
            timeout_ms: 10_000,
            user_agent: concat!("roster/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl MailConfig {
    /// Get the provider timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Weak `local@domain` shape check.
///
/// Only catches obvious typos; the provider has the final say.
#[must_use]
pub fn looks_like_address(candidate: &str) -> bool {
    static ADDRESS: OnceLock<Regex> = OnceLock::new();
    ADDRESS
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("address regex is valid"))
        .is_match(candidate)
}

fn legacy_env_key(key: &UncasedStr) -> Uncased<'_> {
    let mapped = match key.as_str().to_ascii_uppercase().as_str() {
        "API_URL" => "mail.api_url",
        "API_KEY" => "mail.api_key",
        "API_FROM" => "mail.from_address",
        "FLASKY_ADMIN" => "mail.admin_address",
        _ => return key.as_str().into(),
    };
    mapped.into()
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        // Later layers win
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::raw().only(LEGACY_ENV_VARS).map(legacy_env_key))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;

        // Validate the merged result, not each layer
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.mail.timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "mail.timeout_ms must be greater than 0".to_string(),
            });
        }

        let addresses = [
            ("mail.admin_address", &self.mail.admin_address),
            ("mail.from_address", &self.mail.from_address),
            ("mail.secondary_address", &self.mail.secondary_address),
        ];
        for (key, value) in addresses {
            if !value.is_empty() && !looks_like_address(value) {
                return Err(Error::ConfigValidation {
                    message: format!("{key} is not an email address: {value}"),
                });
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the busy timeout as a Duration.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }
}
