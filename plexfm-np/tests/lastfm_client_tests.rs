//! Last.fm client tests against an in-process fake API server
//!
//! Covers:
//! - signed `track.updateNowPlaying` requests
//! - notifier outcomes (sent / skipped / failed)
//! - the two-step web authorization flow through the /setup endpoints,
//!   including write-back of the session key

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use plexfm_common::config::{read_toml_config, LastFmConfig};
use plexfm_np::lastfm::{sign_params, LastFmClient, LastFmError};
use plexfm_np::models::{EventKind, PlexMetadata};
use plexfm_np::session::{
    NotifyOutcome, NowPlayingNotifier, SessionManager, SessionTiming, TrackDetails,
};
use plexfm_np::{build_router, AppState};

const API_KEY: &str = "test-key";
const API_SECRET: &str = "test-secret";
const AUTH_PAGE: &str = "https://auth.example.test/api/auth/";
const TOKEN: &str = "tok-1";

/// Minimal stand-in for ws.audioscrobbler.com
#[derive(Clone, Default)]
struct FakeLastFm {
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    reject_now_playing: Arc<AtomicBool>,
    token_approved: Arc<AtomicBool>,
}

impl FakeLastFm {
    fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().unwrap().clone()
    }

    fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.get("method").cloned())
            .collect()
    }
}

fn api_error(status: StatusCode, code: u32, message: &str) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

async fn fake_api(
    State(fake): State<FakeLastFm>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    fake.requests.lock().unwrap().push(params.clone());

    match params.get("method").map(String::as_str) {
        Some("auth.getToken") => Json(json!({ "token": TOKEN })).into_response(),
        Some("auth.getSession") => {
            if params.get("token").map(String::as_str) != Some(TOKEN) {
                api_error(StatusCode::FORBIDDEN, 4, "Invalid authentication token supplied")
            } else if !fake.token_approved.load(Ordering::SeqCst) {
                api_error(StatusCode::FORBIDDEN, 14, "This token has not been authorized")
            } else {
                Json(json!({
                    "session": { "name": "Listener", "key": "sk-new", "subscriber": 0 }
                }))
                .into_response()
            }
        }
        Some("track.updateNowPlaying") => {
            if fake.reject_now_playing.load(Ordering::SeqCst) {
                api_error(StatusCode::FORBIDDEN, 9, "Invalid session key - Please re-authenticate")
            } else {
                Json(json!({ "nowplaying": { "ignoredMessage": { "code": "0", "#text": "" } } }))
                    .into_response()
            }
        }
        _ => api_error(StatusCode::BAD_REQUEST, 3, "Invalid Method"),
    }
}

/// Start the fake API on an ephemeral port; returns its API root URL
async fn spawn_fake(fake: FakeLastFm) -> String {
    let app = Router::new()
        .route("/2.0/", post(fake_api))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/2.0/", addr)
}

fn config(session_key: Option<&str>) -> LastFmConfig {
    LastFmConfig {
        api_key: Some(API_KEY.to_string()),
        api_secret: Some(API_SECRET.to_string()),
        username: session_key.map(|_| "listener".to_string()),
        session_key: session_key.map(str::to_string),
    }
}

fn client(api_root: &str, session_key: Option<&str>) -> Arc<LastFmClient> {
    Arc::new(
        LastFmClient::new(&config(session_key))
            .unwrap()
            .with_endpoints(api_root, AUTH_PAGE)
            .with_min_request_interval(Duration::ZERO),
    )
}

fn full_track() -> TrackDetails {
    TrackDetails {
        artist: "Artist".to_string(),
        title: "Song".to_string(),
        album: Some("Album".to_string()),
        album_artist: Some("Artist".to_string()),
        track_number: Some(3),
        duration_secs: Some(215),
    }
}

fn assert_signed(params: &HashMap<String, String>) {
    let unsigned: Vec<(&str, String)> = params
        .iter()
        .filter(|(name, _)| name.as_str() != "api_sig")
        .map(|(name, value)| (name.as_str(), value.clone()))
        .collect();
    assert_eq!(
        params.get("api_sig"),
        Some(&sign_params(&unsigned, API_SECRET)),
        "bad signature for {:?}",
        params
    );
}

#[tokio::test]
async fn test_now_playing_request_is_signed() {
    let fake = FakeLastFm::default();
    let root = spawn_fake(fake.clone()).await;
    let client = client(&root, Some("sk-1"));

    assert_eq!(client.notify_now_playing(&full_track()).await, NotifyOutcome::Sent);

    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    let params = &requests[0];
    assert_eq!(params["method"], "track.updateNowPlaying");
    assert_eq!(params["api_key"], API_KEY);
    assert_eq!(params["sk"], "sk-1");
    assert_eq!(params["format"], "json");
    assert_eq!(params["artist"], "Artist");
    assert_eq!(params["track"], "Song");
    assert_eq!(params["album"], "Album");
    assert_eq!(params["albumArtist"], "Artist");
    assert_eq!(params["trackNumber"], "3");
    assert_eq!(params["duration"], "215");
    assert_signed(params);
}

#[tokio::test]
async fn test_absent_optional_fields_not_sent() {
    let fake = FakeLastFm::default();
    let root = spawn_fake(fake.clone()).await;
    let client = client(&root, Some("sk-1"));

    let track = TrackDetails {
        album: None,
        track_number: None,
        duration_secs: None,
        ..full_track()
    };
    client.update_now_playing(&track).await.unwrap();

    let params = &fake.requests()[0];
    assert!(!params.contains_key("album"));
    assert!(!params.contains_key("trackNumber"));
    assert!(!params.contains_key("duration"));
    assert_signed(params);
}

#[tokio::test]
async fn test_skipped_without_session_key() {
    let fake = FakeLastFm::default();
    let root = spawn_fake(fake.clone()).await;
    let client = client(&root, None);

    assert_eq!(client.notify_now_playing(&full_track()).await, NotifyOutcome::Skipped);
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_api_error_reported_as_failure() {
    let fake = FakeLastFm::default();
    fake.reject_now_playing.store(true, Ordering::SeqCst);
    let root = spawn_fake(fake.clone()).await;
    let client = client(&root, Some("sk-expired"));

    match client.update_now_playing(&full_track()).await {
        Err(LastFmError::Api { code, .. }) => assert_eq!(code, 9),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(client.notify_now_playing(&full_track()).await, NotifyOutcome::Failed);
}

#[tokio::test]
async fn test_unreachable_server_reported_as_failure() {
    let client = client("http://127.0.0.1:9/2.0/", Some("sk-1"));

    assert!(matches!(
        client.update_now_playing(&full_track()).await,
        Err(LastFmError::Network(_))
    ));
    assert_eq!(client.notify_now_playing(&full_track()).await, NotifyOutcome::Failed);
}

#[tokio::test]
async fn test_session_keeps_looping_through_failures() {
    let fake = FakeLastFm::default();
    fake.reject_now_playing.store(true, Ordering::SeqCst);
    let root = spawn_fake(fake.clone()).await;
    let lastfm = client(&root, Some("sk-1"));

    let notifier: Arc<dyn NowPlayingNotifier> = lastfm;
    let timing = SessionTiming {
        update_interval: Duration::from_millis(50),
        ..SessionTiming::default()
    };
    let session = SessionManager::new(notifier, timing);

    let metadata = PlexMetadata {
        grandparent_title: Some("Artist".to_string()),
        title: Some("Song".to_string()),
        ..Default::default()
    };
    session.process_event(EventKind::Play, Some(&metadata)).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    session.shutdown().await;

    let attempts = fake.methods().len();
    assert!(attempts >= 3, "only {} attempts", attempts);
}

// ----- setup flow -----

struct SetupFixture {
    fake: FakeLastFm,
    lastfm: Arc<LastFmClient>,
    session: SessionManager,
    app: Router,
}

async fn setup_fixture(config_path: PathBuf) -> SetupFixture {
    let fake = FakeLastFm::default();
    let root = spawn_fake(fake.clone()).await;
    let lastfm = client(&root, None);

    let notifier: Arc<dyn NowPlayingNotifier> = lastfm.clone();
    let session = SessionManager::new(notifier, SessionTiming::default());
    let state = AppState::new(session.clone(), lastfm.clone(), config_path);

    SetupFixture {
        fake,
        lastfm,
        session,
        app: build_router(state),
    }
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn write_initial_config(path: &Path) {
    std::fs::write(
        path,
        format!(
            "[server]\nport = 8100\n\n[lastfm]\napi_key = \"{}\"\napi_secret = \"{}\"\n",
            API_KEY, API_SECRET
        ),
    )
    .unwrap();
}

#[tokio::test]
async fn test_setup_flow_stores_and_activates_session() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    write_initial_config(&config_path);

    let fixture = setup_fixture(config_path.clone()).await;
    fixture.fake.token_approved.store(true, Ordering::SeqCst);

    let (status, json) = get_json(&fixture.app, "/setup/lastfm").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["auth_url"],
        format!("{}?api_key={}&token={}", AUTH_PAGE, API_KEY, TOKEN)
    );

    let (status, json) = get_json(&fixture.app, "/setup/lastfm/complete?username=listener").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Authentication successful!");

    // Active without a restart
    assert!(fixture.lastfm.is_ready().await);
    assert!(!fixture.lastfm.setup_mode().await);
    assert_eq!(fixture.lastfm.username().await.as_deref(), Some("Listener"));

    // Persisted alongside the existing settings
    let stored = read_toml_config(&config_path).unwrap();
    assert_eq!(stored.server.port, 8100);
    assert_eq!(stored.lastfm.api_key.as_deref(), Some(API_KEY));
    assert_eq!(stored.lastfm.username.as_deref(), Some("Listener"));
    assert_eq!(stored.lastfm.session_key.as_deref(), Some("sk-new"));

    for request in fixture.fake.requests() {
        assert_signed(&request);
    }

    let (_, page) = get_text(&fixture.app, "/setup").await;
    assert!(page.contains("Setup Not Required"));

    // Now-playing updates use the new session key
    let metadata = PlexMetadata {
        grandparent_title: Some("Artist".to_string()),
        title: Some("Song".to_string()),
        ..Default::default()
    };
    fixture.session.process_event(EventKind::Play, Some(&metadata)).await;
    fixture.session.shutdown().await;

    let requests = fixture.fake.requests();
    let last = requests.last().unwrap();
    assert_eq!(last["method"], "track.updateNowPlaying");
    assert_eq!(last["sk"], "sk-new");
}

#[tokio::test]
async fn test_complete_before_approval_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    let fixture = setup_fixture(config_path.clone()).await;

    let (status, _) = get_json(&fixture.app, "/setup/lastfm").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = get_json(&fixture.app, "/setup/lastfm/complete?username=listener").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
    assert!(fixture.lastfm.setup_mode().await);
    assert!(!config_path.exists());

    fixture.fake.token_approved.store(true, Ordering::SeqCst);

    let (status, _) = get_json(&fixture.app, "/setup/lastfm/complete?username=listener").await;
    assert_eq!(status, StatusCode::OK);
    assert!(config_path.exists());
    assert_eq!(
        fixture.fake.methods(),
        vec!["auth.getToken", "auth.getSession", "auth.getSession"]
    );
}

#[tokio::test]
async fn test_unwritable_config_shows_error_page() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-directory");
    std::fs::write(&blocker, "").unwrap();
    let config_path = blocker.join("config.toml");

    let fixture = setup_fixture(config_path).await;
    fixture.fake.token_approved.store(true, Ordering::SeqCst);

    let (status, _) = get_json(&fixture.app, "/setup/lastfm").await;
    assert_eq!(status, StatusCode::OK);

    let (status, page) = get_text(&fixture.app, "/setup/lastfm/complete?username=listener").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(page.contains("Last.fm Configuration Error"));
    assert!(page.contains("Could not save the Last.fm session key"));

    // Not activated when it could not be persisted
    assert!(fixture.lastfm.setup_mode().await);
}
