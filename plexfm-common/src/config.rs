//! Configuration file schema, resolution and write-back
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument / environment variable (handled by each binary)
//! 2. TOML config file
//! 3. Compiled defaults
//!
//! A missing or unreadable TOML file never prevents startup: the binary logs
//! a warning and uses compiled defaults. The file is only written when the
//! Last.fm setup flow obtains a new session key.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "PLEXFM_CONFIG";

/// Default interval between periodic now-playing updates
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

/// Default time a pause may last before the session is torn down
pub const DEFAULT_PAUSE_TIMEOUT_SECS: u64 = 300;

/// Top-level TOML configuration
///
/// Every section is optional; absent sections fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub lastfm: LastFmConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: "::", all interfaces)
    pub host: String,
    /// HTTP port (default: 8000)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "::".to_string(),
            port: 8000,
        }
    }
}

/// Last.fm credentials
///
/// `session_key` is absent until the setup flow has completed once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

/// Session timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds between periodic now-playing updates
    pub update_interval_secs: u64,
    /// Seconds a pause may last before the session is torn down
    pub pause_timeout_secs: u64,
    /// When the periodic loop sends its first update
    pub first_repeat: FirstRepeat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: DEFAULT_UPDATE_INTERVAL_SECS,
            pause_timeout_secs: DEFAULT_PAUSE_TIMEOUT_SECS,
            first_repeat: FirstRepeat::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (logs to stderr if not specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Timing of the periodic loop's first update after a play event
///
/// The play handler always sends one immediate update itself, so the loop
/// normally waits a full interval before repeating it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstRepeat {
    /// Sleep one interval before the first periodic update
    #[default]
    AfterInterval,
    /// Send the first periodic update as soon as the loop starts
    Immediate,
}

impl FromStr for FirstRepeat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_interval" | "after-interval" | "delayed" => Ok(Self::AfterInterval),
            "immediate" => Ok(Self::Immediate),
            other => Err(format!(
                "invalid first repeat policy '{}' (expected 'after_interval' or 'immediate')",
                other
            )),
        }
    }
}

impl fmt::Display for FirstRepeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterInterval => f.write_str("after_interval"),
            Self::Immediate => f.write_str("immediate"),
        }
    }
}

/// Resolve the config file path
///
/// Priority: command-line argument, then `PLEXFM_CONFIG`, then the
/// platform config directory.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    default_config_path()
}

/// OS-dependent default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("plexfm").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("plexfm.toml"))
}

/// Read and parse a TOML config file, failing on any error
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Write a TOML config file atomically
///
/// Writes to a sibling temp file, then renames over the target. Parent
/// directories are created as needed. On Unix the file is made owner-only
/// since it holds credentials.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}

/// Persist a newly obtained Last.fm session to the config file
///
/// Existing settings in the file are preserved. A file that exists but
/// cannot be parsed is left untouched and reported as an error.
pub fn store_lastfm_session(path: &Path, username: &str, session_key: &str) -> Result<()> {
    let mut config = if path.exists() {
        read_toml_config(path).map_err(|e| {
            Error::Config(format!(
                "refusing to overwrite unreadable config file {}: {}",
                path.display(),
                e
            ))
        })?
    } else {
        TomlConfig::default()
    };

    config.lastfm.username = Some(username.to_string());
    config.lastfm.session_key = Some(session_key.to_string());

    write_toml_config(&config, path)?;
    info!("Stored Last.fm session for {} in {}", username, path.display());
    Ok(())
}
