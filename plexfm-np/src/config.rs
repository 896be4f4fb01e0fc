//! Runtime settings for plexfm-np
//!
//! Resolution priority, per setting:
//! 1. Command-line argument or environment variable
//! 2. TOML config file
//! 3. Built-in defaults
//!
//! Settings are read once at startup.

use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

use plexfm_common::config::{
    FirstRepeat, LastFmConfig, LoggingConfig, ServerConfig, SessionConfig,
    TomlConfig, DEFAULT_PAUSE_TIMEOUT_SECS, DEFAULT_UPDATE_INTERVAL_SECS,
};

/// Command-line arguments for plexfm-np
#[derive(Parser, Debug, Default)]
#[command(name = "plexfm-np")]
#[command(about = "Forwards Plex playback webhooks to Last.fm Now Playing")]
#[command(version)]
pub struct Args {
    /// Config file (default: <config dir>/plexfm/config.toml, or $PLEXFM_CONFIG)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "APP_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "APP_PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Seconds between periodic now-playing updates
    #[arg(long, env = "UPDATE_INTERVAL_SECONDS")]
    pub update_interval: Option<u64>,

    /// Seconds a pause may last before updates stop
    #[arg(long, env = "PAUSE_TIMEOUT_SECONDS")]
    pub pause_timeout: Option<u64>,

    /// First periodic update: after_interval or immediate
    #[arg(long, env = "FIRST_REPEAT")]
    pub first_repeat: Option<FirstRepeat>,

    #[arg(long, env = "LASTFM_API_KEY", hide_env_values = true)]
    pub lastfm_api_key: Option<String>,

    #[arg(long, env = "LASTFM_API_SECRET", hide_env_values = true)]
    pub lastfm_api_secret: Option<String>,

    #[arg(long, env = "LASTFM_USERNAME")]
    pub lastfm_username: Option<String>,

    #[arg(long, env = "LASTFM_SESSION_KEY", hide_env_values = true)]
    pub lastfm_session_key: Option<String>,
}

/// Fully resolved settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Where credentials are written back by the setup flow
    pub config_path: PathBuf,
    pub server: ServerConfig,
    pub lastfm: LastFmConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Merge arguments over a parsed TOML config
    pub fn resolve(args: Args, toml: TomlConfig, config_path: PathBuf) -> Self {
        let TomlConfig {
            mut server,
            mut lastfm,
            mut session,
            mut logging,
        } = toml;

        if let Some(host) = args.host {
            server.host = host;
        }
        if let Some(port) = args.port {
            server.port = port;
        }
        if let Some(level) = args.log_level {
            logging.level = level;
        }

        if let Some(secs) = args.update_interval {
            session.update_interval_secs = secs;
        }
        if let Some(secs) = args.pause_timeout {
            session.pause_timeout_secs = secs;
        }
        if let Some(policy) = args.first_repeat {
            session.first_repeat = policy;
        }

        if session.update_interval_secs == 0 {
            warn!(
                "update interval of 0s is not allowed, using {}s",
                DEFAULT_UPDATE_INTERVAL_SECS
            );
            session.update_interval_secs = DEFAULT_UPDATE_INTERVAL_SECS;
        }
        if session.pause_timeout_secs == 0 {
            warn!(
                "pause timeout of 0s is not allowed, using {}s",
                DEFAULT_PAUSE_TIMEOUT_SECS
            );
            session.pause_timeout_secs = DEFAULT_PAUSE_TIMEOUT_SECS;
        }

        lastfm.api_key = args.lastfm_api_key.or(lastfm.api_key);
        lastfm.api_secret = args.lastfm_api_secret.or(lastfm.api_secret);
        lastfm.username = args.lastfm_username.or(lastfm.username);
        lastfm.session_key = args.lastfm_session_key.or(lastfm.session_key);

        Self {
            config_path,
            server,
            lastfm,
            session,
            logging,
        }
    }

    /// `host:port` string for the listener
    pub fn bind_addr(&self) -> String {
        if self.server.host.contains(':') && !self.server.host.starts_with('[') {
            format!("[{}]:{}", self.server.host, self.server.port)
        } else {
            format!("{}:{}", self.server.host, self.server.port)
        }
    }
}
