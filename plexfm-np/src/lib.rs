//! plexfm-np library - Plex → Last.fm Now Playing bridge
//!
//! Receives Plex playback webhooks, keeps track of the single current track
//! and keeps Last.fm's "now playing" indicator up to date while it plays.

pub mod api;
pub mod config;
pub mod error;
pub mod lastfm;
pub mod models;
pub mod session;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::lastfm::LastFmClient;
use crate::session::SessionManager;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Playback session driven by webhooks
    pub session: SessionManager,
    /// Last.fm client, also used by the setup flow
    pub lastfm: Arc<LastFmClient>,
    /// Config file the setup flow writes the session key to
    pub config_path: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(session: SessionManager, lastfm: Arc<LastFmClient>, config_path: PathBuf) -> Self {
        Self {
            session,
            lastfm,
            config_path,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::webhook_routes())
        .merge(api::setup_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
