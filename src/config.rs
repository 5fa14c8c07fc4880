//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILVAULT_CONFIG` (environment variable)
//! 2. `~/.config/mailvault/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailvault\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! `MAILVAULT_*` environment variables then override individual values.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::fetch::{ConnectionConfig, FetchOptions};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub imap: ImapConfig,
    pub fetch: FetchConfig,
    pub storage: StorageConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Mail server account.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Implicit TLS. Disable only for local test servers.
    pub use_tls: bool,
}

/// Fetch window and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub lookback_hours: u32,
    /// When set, takes precedence over `lookback_hours`.
    pub lookback_minutes: Option<u32>,
    pub strip_quotes: bool,
    pub max_retries: u32,
    pub retry_backoff_base: f64,
    /// Gmail only: skip the Promotions, Social, Updates and Forums categories.
    pub primary_only: bool,
    /// Window on server arrival time rather than the `Date:` header.
    pub use_arrival_date: bool,
}

/// Where records and the index live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `<data_dir>/mailvault`.
    pub dir: Option<PathBuf>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: "imap.gmail.com".to_string(),
            port: 993,
            username: String::new(),
            password: String::new(),
            use_tls: true,
        }
    }
}

impl std::fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            lookback_minutes: None,
            strip_quotes: true,
            max_retries: crate::fetch::DEFAULT_MAX_RETRIES,
            retry_backoff_base: crate::fetch::DEFAULT_BACKOFF_BASE,
            primary_only: false,
            use_arrival_date: true,
        }
    }
}

// ── Derived values ──────────────────────────────────────────────

impl Config {
    /// Copy safe to print: the password is replaced by `***`.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        if !copy.imap.password.is_empty() {
            copy.imap.password = "***".to_string();
        }
        copy
    }

    /// Resolved connection settings for the fetch client.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.imap.host.clone(),
            port: self.imap.port,
            username: self.imap.username.clone(),
            secret: self.imap.password.clone(),
            use_tls: self.imap.use_tls,
            max_retries: self.fetch.max_retries,
            backoff_base: self.fetch.retry_backoff_base,
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            primary_only: self.fetch.primary_only,
            use_arrival_date: self.fetch.use_arrival_date,
        }
    }

    /// Length of the fetch window. Minutes win over hours.
    pub fn lookback(&self) -> Duration {
        match self.fetch.lookback_minutes {
            Some(minutes) => Duration::minutes(i64::from(minutes)),
            None => Duration::hours(i64::from(self.fetch.lookback_hours)),
        }
    }

    /// Apply `MAILVAULT_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MAILVAULT_HOST") {
            self.imap.host = host;
        }
        if let Some(port) = lookup("MAILVAULT_PORT") {
            match port.parse() {
                Ok(port) => self.imap.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid MAILVAULT_PORT"),
            }
        }
        if let Some(username) = lookup("MAILVAULT_USERNAME") {
            self.imap.username = username;
        }
        if let Some(password) = lookup("MAILVAULT_PASSWORD") {
            self.imap.password = password;
        }
        if let Some(dir) = lookup("MAILVAULT_STORAGE_DIR") {
            self.storage.dir = Some(PathBuf::from(dir));
        }
        if let Some(hours) = lookup("MAILVAULT_LOOKBACK_HOURS") {
            match hours.parse() {
                Ok(hours) => self.fetch.lookback_hours = hours,
                Err(_) => tracing::warn!(value = %hours, "Ignoring invalid MAILVAULT_LOOKBACK_HOURS"),
            }
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from the standard location, then apply environment
/// overrides.
///
/// Falls back to defaults if no file is found or on parse error.
pub fn load_config() -> Config {
    let mut config = load_file().unwrap_or_default();
    config.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    config
}

fn load_file() -> Option<Config> {
    let path = config_file_path()?;
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                Some(cfg)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                None
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            None
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILVAULT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailvault").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailvault")
}

/// Return the storage root for records and the index.
pub fn storage_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.storage.dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailvault")
}
