//! One-time Last.fm authorization flow
//!
//! 1. `GET /setup/lastfm` fetches a request token and returns the Last.fm
//!    page where the user approves it.
//! 2. `GET /setup/lastfm/complete?username=...` exchanges the approved token
//!    for a session key, writes it to the config file and starts using it.
//!
//! Both steps are only available while no session key is configured.

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use plexfm_common::config::store_lastfm_session;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const SETUP_PAGE: &str = include_str!("setup.html");

const SETUP_NOT_REQUIRED_PAGE: &str = r#"<!DOCTYPE html>
<html>
    <head><title>Setup Not Required</title></head>
    <body>
        <h1>Setup Not Required</h1>
        <p>The application is already configured and running normally.</p>
    </body>
</html>
"#;

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub auth_url: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteParams {
    /// Last.fm username entered by the user
    pub username: String,
}

async fn require_setup_mode(state: &AppState) -> ApiResult<()> {
    if state.lastfm.setup_mode().await {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "Last.fm updater is not in setup mode".to_string(),
        ))
    }
}

/// GET /setup
pub async fn setup_page(State(state): State<AppState>) -> Html<&'static str> {
    if state.lastfm.setup_mode().await {
        Html(SETUP_PAGE)
    } else {
        Html(SETUP_NOT_REQUIRED_PAGE)
    }
}

/// GET /setup/lastfm
pub async fn start_lastfm_setup(State(state): State<AppState>) -> ApiResult<Json<AuthResponse>> {
    require_setup_mode(&state).await?;

    let auth_url = state.lastfm.generate_auth_url().await.map_err(|e| {
        error!("Failed to start Last.fm authorization: {}", e);
        ApiError::Internal(e.to_string())
    })?;

    Ok(Json(AuthResponse {
        auth_url,
        message: "Please visit this URL to authorize the application, then return to /setup/lastfm/complete"
            .to_string(),
    }))
}

/// GET /setup/lastfm/complete
pub async fn complete_lastfm_setup(
    State(state): State<AppState>,
    Query(params): Query<CompleteParams>,
) -> ApiResult<Json<MessageResponse>> {
    require_setup_mode(&state).await?;

    if params.username.trim().is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".to_string()));
    }

    let session = state.lastfm.complete_auth(&params.username).await.map_err(|e| {
        error!("Failed to complete Last.fm authorization: {}", e);
        ApiError::from(e)
    })?;

    store_lastfm_session(&state.config_path, &session.username, &session.key).map_err(|e| {
        error!("Failed to persist Last.fm session key: {}", e);
        ApiError::LastFmConfig(format!(
            "Could not save the Last.fm session key to {}: {}",
            state.config_path.display(),
            e
        ))
    })?;

    info!("Last.fm authorization complete for {}", session.username);
    state.lastfm.activate_session(session).await;

    Ok(Json(MessageResponse {
        message: "Authentication successful!".to_string(),
    }))
}

/// Build setup flow routes
pub fn setup_routes() -> Router<AppState> {
    Router::new()
        .route("/setup", get(setup_page))
        .route("/setup/lastfm", get(start_lastfm_setup))
        .route("/setup/lastfm/complete", get(complete_lastfm_setup))
}
