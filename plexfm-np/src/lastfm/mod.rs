//! Last.fm API client
//!
//! Sends `track.updateNowPlaying` for the session, and performs the one-time
//! web authentication (`auth.getToken` → user approval → `auth.getSession`)
//! that yields a long-lived session key.
//!
//! Without a session key the client runs in setup mode: every now-playing
//! call is skipped, never failed.

mod signature;

pub use signature::sign_params;

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use plexfm_common::config::LastFmConfig;

use crate::session::{NotifyOutcome, NowPlayingNotifier, TrackDetails};

pub const API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";
pub const AUTH_PAGE_URL: &str = "https://www.last.fm/api/auth/";
const USER_AGENT: &str = concat!("plexfm/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RATE_LIMIT_MS: u64 = 1000; // 1 request per second

/// Last.fm client errors
#[derive(Debug, Error)]
pub enum LastFmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Last.fm API error {code}: {message}")]
    Api { code: u32, message: String },

    #[error("HTTP error {0}: {1}")]
    Http(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing Last.fm credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("No pending authorization token; start the setup flow first")]
    NoPendingToken,
}

/// Authenticated Last.fm session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastFmSession {
    pub username: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: SessionBody,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    name: String,
    key: String,
}

type RequestLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter allowing one request per `min_interval`; `None` when the interval is zero
fn request_limiter(min_interval: Duration) -> Option<RequestLimiter> {
    Quota::with_period(min_interval).map(RateLimiter::direct)
}

/// Treat blank values as absent
fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Last.fm API client
///
/// The underlying `reqwest::Client` pools connections and is safe to use
/// from the play handler and the update loop concurrently.
pub struct LastFmClient {
    http_client: reqwest::Client,
    api_root: String,
    auth_page_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    session: RwLock<Option<LastFmSession>>,
    pending_token: Mutex<Option<String>>,
    rate_limiter: Option<RequestLimiter>,
}

impl LastFmClient {
    pub fn new(config: &LastFmConfig) -> Result<Self, LastFmError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LastFmError::Network(e.to_string()))?;

        let api_key = non_blank(&config.api_key);
        let api_secret = non_blank(&config.api_secret);
        let session = non_blank(&config.session_key).map(|key| LastFmSession {
            username: non_blank(&config.username).unwrap_or_default(),
            key,
        });

        if api_key.is_none() || api_secret.is_none() {
            error!("Missing Last.fm API key or secret; now-playing updates are disabled");
        } else if let Some(session) = &session {
            info!("Last.fm client initialized for user: {}", session.username);
        } else {
            warn!("No Last.fm session key configured; visit /setup to authorize");
        }

        Ok(Self {
            http_client,
            api_root: API_ROOT.to_string(),
            auth_page_url: AUTH_PAGE_URL.to_string(),
            api_key,
            api_secret,
            session: RwLock::new(session),
            pending_token: Mutex::new(None),
            rate_limiter: request_limiter(Duration::from_millis(RATE_LIMIT_MS)),
        })
    }

    /// Point the client at other endpoints (test servers, proxies)
    pub fn with_endpoints(mut self, api_root: impl Into<String>, auth_page_url: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self.auth_page_url = auth_page_url.into();
        self
    }

    /// Override the minimum spacing between requests
    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.rate_limiter = request_limiter(interval);
        self
    }

    /// True when now-playing updates can actually be sent
    pub async fn is_ready(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some() && self.session.read().await.is_some()
    }

    /// True until a session key is available
    pub async fn setup_mode(&self) -> bool {
        self.session.read().await.is_none()
    }

    pub async fn username(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.username.clone())
    }

    fn credentials(&self) -> Result<(&str, &str), LastFmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(LastFmError::MissingCredentials("api_key"))?;
        let api_secret = self
            .api_secret
            .as_deref()
            .ok_or(LastFmError::MissingCredentials("api_secret"))?;
        Ok((api_key, api_secret))
    }

    /// Perform one signed API call and return the JSON body
    async fn call(
        &self,
        method: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<serde_json::Value, LastFmError> {
        let (api_key, api_secret) = self.credentials()?;

        params.push(("method", method.to_string()));
        params.push(("api_key", api_key.to_string()));
        let api_sig = sign_params(&params, api_secret);
        params.push(("api_sig", api_sig));
        params.push(("format", "json".to_string()));

        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        debug!(method, url = %self.api_root, "Calling Last.fm API");

        let response = self
            .http_client
            .post(&self.api_root)
            .form(&params)
            .send()
            .await
            .map_err(|e| LastFmError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LastFmError::Network(e.to_string()))?;

        if let Ok(api_error) = serde_json::from_str::<ErrorResponse>(&body) {
            return Err(LastFmError::Api {
                code: api_error.error,
                message: api_error.message,
            });
        }

        if !status.is_success() {
            return Err(LastFmError::Http(status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| LastFmError::Parse(e.to_string()))
    }

    /// Send `track.updateNowPlaying`
    pub async fn update_now_playing(&self, track: &TrackDetails) -> Result<(), LastFmError> {
        let session_key = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.key.clone())
            .ok_or(LastFmError::MissingCredentials("session_key"))?;

        let mut params = vec![
            ("artist", track.artist.clone()),
            ("track", track.title.clone()),
            ("sk", session_key),
        ];
        if let Some(album) = &track.album {
            params.push(("album", album.clone()));
        }
        if let Some(album_artist) = &track.album_artist {
            params.push(("albumArtist", album_artist.clone()));
        }
        if let Some(number) = track.track_number {
            params.push(("trackNumber", number.to_string()));
        }
        if let Some(duration) = track.duration_secs {
            params.push(("duration", duration.to_string()));
        }

        self.call("track.updateNowPlaying", params).await?;
        Ok(())
    }

    /// Start web authentication
    ///
    /// Fetches a request token, remembers it for [`complete_auth`], and
    /// returns the URL the user must visit to approve it.
    ///
    /// [`complete_auth`]: LastFmClient::complete_auth
    pub async fn generate_auth_url(&self) -> Result<String, LastFmError> {
        let (api_key, _) = self.credentials()?;

        let body = self.call("auth.getToken", Vec::new()).await?;
        let token: TokenResponse =
            serde_json::from_value(body).map_err(|e| LastFmError::Parse(e.to_string()))?;

        let url = format!(
            "{}?api_key={}&token={}",
            self.auth_page_url, api_key, token.token
        );

        *self.pending_token.lock().await = Some(token.token);
        info!("Generated Last.fm authorization URL");
        Ok(url)
    }

    /// Exchange the approved token for a session key
    ///
    /// The pending token is kept on failure so the user can retry after
    /// approving it.
    pub async fn complete_auth(&self, username: &str) -> Result<LastFmSession, LastFmError> {
        let token = self
            .pending_token
            .lock()
            .await
            .clone()
            .ok_or(LastFmError::NoPendingToken)?;

        let body = self
            .call("auth.getSession", vec![("token", token)])
            .await?;
        let response: SessionResponse =
            serde_json::from_value(body).map_err(|e| LastFmError::Parse(e.to_string()))?;

        if !response.session.name.eq_ignore_ascii_case(username.trim()) {
            warn!(
                "Last.fm authorized user '{}' differs from entered username '{}'",
                response.session.name, username
            );
        }

        *self.pending_token.lock().await = None;

        Ok(LastFmSession {
            username: response.session.name,
            key: response.session.key,
        })
    }

    /// Start using a session obtained through the setup flow
    pub async fn activate_session(&self, session: LastFmSession) {
        info!("Last.fm session activated for user: {}", session.username);
        *self.session.write().await = Some(session);
    }
}

#[async_trait]
impl NowPlayingNotifier for LastFmClient {
    async fn notify_now_playing(&self, track: &TrackDetails) -> NotifyOutcome {
        if !self.is_ready().await {
            warn!("Last.fm network not available, skipping Now Playing update.");
            return NotifyOutcome::Skipped;
        }

        info!(
            artist = %track.artist,
            title = %track.title,
            album = track.album.as_deref().unwrap_or(""),
            "Updating Now Playing"
        );

        match self.update_now_playing(track).await {
            Ok(()) => {
                debug!("Successfully updated Now Playing on Last.fm");
                NotifyOutcome::Sent
            }
            Err(e) => {
                error!("Failed to update Last.fm Now Playing: {}", e);
                NotifyOutcome::Failed
            }
        }
    }
}
