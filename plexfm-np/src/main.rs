//! plexfm-np - Main entry point
//!
//! Listens for Plex webhooks and keeps the Last.fm "now playing" status of
//! the configured account in sync with what Plex is playing.

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plexfm_common::config::{read_toml_config, resolve_config_path, LoggingConfig, TomlConfig};
use plexfm_np::config::{Args, Settings};
use plexfm_np::lastfm::LastFmClient;
use plexfm_np::session::{NowPlayingNotifier, SessionManager, SessionTiming};
use plexfm_np::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let (toml_config, load_error) = match read_toml_config(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (TomlConfig::default(), Some(e)),
    };
    let settings = Settings::resolve(args, toml_config, config_path);

    init_tracing(&settings.logging)?;

    info!(
        "Starting plexfm-np v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match load_error {
        None => info!("Loaded config from {}", settings.config_path.display()),
        Some(e) => warn!(
            "Could not load config from {} ({}), using defaults",
            settings.config_path.display(),
            e
        ),
    }

    info!(
        "Update interval: {}s, pause timeout: {}s, first repeat: {}",
        settings.session.update_interval_secs,
        settings.session.pause_timeout_secs,
        settings.session.first_repeat
    );

    let lastfm = Arc::new(
        LastFmClient::new(&settings.lastfm).context("Failed to initialize Last.fm client")?,
    );

    let notifier: Arc<dyn NowPlayingNotifier> = lastfm.clone();
    let session = SessionManager::new(notifier, SessionTiming::from(&settings.session));

    let state = AppState::new(session.clone(), lastfm, settings.config_path.clone());
    let app = build_router(state);

    let addr = settings.bind_addr();
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    session.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing
///
/// `RUST_LOG` wins over the configured level. Logs go to stderr unless a
/// log file is configured.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| EnvFilter::try_new(format!("{},tower_http=info", logging.level)).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
