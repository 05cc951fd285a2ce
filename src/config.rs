//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$USERDATA_EXPAND_CONFIG` (environment variable)
//! 2. `~/.config/userdata-expand/config.toml` (Linux/macOS)
//!    `%APPDATA%\userdata-expand\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::parser::archive::ArchiveHeaderMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Expansion behavior.
    pub processing: ProcessingConfig,
    /// Include fetching.
    pub fetch: FetchConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for include-once content and logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Expansion behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Maximum include/archive nesting. Unset means unbounded.
    pub max_depth: Option<usize>,
    /// How extra archive entry keys become headers: "per-key" or "literal".
    pub archive_headers: ArchiveHeaderMode,
}

/// Include fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` sent with HTTP requests.
    pub user_agent: String,
    /// Treat 3xx responses as successful fetches.
    pub allow_redirect_status: bool,
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

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("userdata-expand/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_redirect_status: false,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Where the active configuration came from.
///
/// Loading happens before logging is configured (the log level itself is a
/// config value), so the outcome is returned and reported afterwards with
/// [`ConfigSource::log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// No config file; built-in defaults.
    Defaults,
    /// Parsed from this file.
    File(PathBuf),
    /// A config file exists but could not be used; defaults apply.
    Rejected { path: PathBuf, reason: String },
}

impl ConfigSource {
    /// Report the load outcome through `tracing`.
    pub fn log(&self) {
        match self {
            Self::Defaults => tracing::debug!("No config file, using defaults"),
            Self::File(path) => tracing::info!(path = %path.display(), "Loaded config"),
            Self::Rejected { path, reason } => tracing::warn!(
                path = %path.display(),
                error = %reason,
                "Failed to load config, using defaults"
            ),
        }
    }
}

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> (Config, ConfigSource) {
    match config_file_path() {
        Some(path) => load_config_from(&path),
        None => (Config::default(), ConfigSource::Defaults),
    }
}

/// Load configuration from a specific file.
pub fn load_config_from(path: &Path) -> (Config, ConfigSource) {
    if !path.exists() {
        return (Config::default(), ConfigSource::Defaults);
    }
    let rejected = |reason: String| ConfigSource::Rejected {
        path: path.to_path_buf(),
        reason,
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => (cfg, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), rejected(e.to_string())),
        },
        Err(e) => (Config::default(), rejected(e.to_string())),
    }
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("USERDATA_EXPAND_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("userdata-expand").join("config.toml"))
}

/// Return the cache directory for include-once content and logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("userdata-expand")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("userdata-expand.log")
}
