//! Playback session state machine
//!
//! Tracks the single "current" track reported by Plex and drives the
//! Last.fm now-playing indicator for it:
//!
//! - **play / resume**: start notifying for a new track, or keep the
//!   existing loop when the same track resumes
//! - **pause**: arm a one-shot timer; if nothing follows before it fires,
//!   the session is torn down
//! - **stop**: tear down immediately
//!
//! All state lives behind one async mutex. The play handler holds it
//! across two suspension points only: the bounded wait for the previous
//! loop to terminate, and the immediate notification. This guarantees two
//! update loops never run for the same session at once.
//!
//! ```text
//!             play/resume              pause
//!   Idle ───────────────▶ Playing ─────────────▶ PausedPendingTimeout
//!    ▲                     │  ▲                      │        │
//!    │        stop         │  └──── play/resume ─────┘        │
//!    ├─────────────────────┘                                  │
//!    └──────────────────── stop / timer expiry ───────────────┘
//! ```

mod notifier;
mod pause_timer;
mod track;
mod update_loop;

pub use notifier::{NotifyOutcome, NowPlayingNotifier};
pub use track::{TrackDetails, TrackKey};

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexfm_common::config::{FirstRepeat, SessionConfig};

use crate::models::{EventKind, PlexMetadata, WebhookPayload};
use pause_timer::PauseTimer;
use update_loop::UpdateTask;

/// Upper bound on waiting for a cancelled update loop to finish
const LOOP_CANCEL_WAIT: Duration = Duration::from_secs(1);

/// Data-integrity failures detected by the update loop
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No track is stored for the session
    #[error("no current track details")]
    MissingDetails,

    /// The stored track is not the one the loop was started for
    #[error("current track changed underneath loop bound to '{0}'")]
    TrackMismatch(TrackKey),

    /// A required field is empty
    #[error("track details missing required field '{0}'")]
    IncompleteDetails(&'static str),
}

/// Timing parameters, read once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Sleep between periodic updates
    pub update_interval: Duration,
    /// Delay before a pause tears the session down
    pub pause_timeout: Duration,
    /// Whether the loop waits one interval before its first update
    pub first_repeat: FirstRepeat,
}

impl From<&SessionConfig> for SessionTiming {
    fn from(config: &SessionConfig) -> Self {
        Self {
            update_interval: Duration::from_secs(config.update_interval_secs),
            pause_timeout: Duration::from_secs(config.pause_timeout_secs),
            first_repeat: config.first_repeat,
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Derived session phase
///
/// `Playing` requires a live update loop. A loop that ended on its own
/// (inconsistent track details) leaves the session `Idle` even though the
/// snapshot may still carry the stored track; the next play or resume for
/// that track starts a fresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Playing,
    PausedPendingTimeout,
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub track: Option<TrackDetails>,
    pub update_loop_active: bool,
    pub pause_timer_armed: bool,
    /// Update loop tasks that have not yet terminated
    pub live_update_loops: usize,
}

/// Current track: key and details are stored and cleared together
#[derive(Debug, Clone)]
struct CurrentTrack {
    key: TrackKey,
    details: TrackDetails,
}

#[derive(Default)]
struct SessionState {
    current: Option<CurrentTrack>,
    update_task: Option<UpdateTask>,
    pause_timer: Option<PauseTimer>,
}

impl SessionState {
    fn loop_active(&self) -> bool {
        self.update_task.as_ref().is_some_and(UpdateTask::is_active)
    }

    fn disarm_pause_timer(&mut self) {
        if let Some(timer) = self.pause_timer.take() {
            timer.disarm();
            debug!("Cancelled pause timer");
        }
    }
}

/// State shared between the manager, the update loop and the pause timer
pub(crate) struct SessionShared {
    notifier: Arc<dyn NowPlayingNotifier>,
    timing: SessionTiming,
    state: Mutex<SessionState>,
    live_loops: AtomicUsize,
}

/// Handle to the playback session
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<SessionShared>,
}

impl SessionManager {
    pub fn new(notifier: Arc<dyn NowPlayingNotifier>, timing: SessionTiming) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                notifier,
                timing,
                state: Mutex::new(SessionState::default()),
                live_loops: AtomicUsize::new(0),
            }),
        }
    }

    pub fn timing(&self) -> SessionTiming {
        self.shared.timing
    }

    /// Route a parsed webhook to the matching transition
    ///
    /// Events other than play/resume/pause/stop are ignored.
    pub async fn process_webhook(&self, payload: &WebhookPayload) {
        debug!(event = %payload.event, "Processing webhook event");

        match EventKind::from_plex_event(&payload.event) {
            Some(kind) => self.process_event(kind, payload.metadata.as_ref()).await,
            None => debug!(event = %payload.event, "Ignoring irrelevant event"),
        }
    }

    /// Apply one playback transition
    pub async fn process_event(&self, kind: EventKind, metadata: Option<&PlexMetadata>) {
        match kind {
            EventKind::Play | EventKind::Resume => self.handle_play(kind, metadata).await,
            EventKind::Pause => self.handle_pause().await,
            EventKind::Stop => {
                info!("Received '{}'. Stopping periodic updates.", kind.as_str());
                self.stop("media.stop event").await;
            }
        }
    }

    async fn handle_play(&self, kind: EventKind, metadata: Option<&PlexMetadata>) {
        let Some(metadata) = metadata else {
            warn!("Received '{}' event without metadata. Skipping.", kind.as_str());
            return;
        };

        let (Some(key), Some(details)) = (
            TrackKey::from_metadata(metadata),
            TrackDetails::from_metadata(metadata),
        ) else {
            warn!(
                "Received '{}' event with missing title or artist. Skipping.",
                kind.as_str()
            );
            return;
        };

        let mut state = self.shared.state.lock().await;

        state.disarm_pause_timer();

        let same_track = state.current.as_ref().is_some_and(|c| c.key == key);
        if same_track && state.loop_active() {
            info!(title = %details.title, "Resuming periodic updates for already playing track");
            return;
        }

        info!(
            artist = %details.artist,
            title = %details.title,
            "Received '{}' for new track",
            kind.as_str()
        );

        if let Some(task) = state.update_task.take() {
            task.cancel_and_wait(LOOP_CANCEL_WAIT).await;
            info!("Previous Now Playing task cancelled for new track");
        }

        state.current = Some(CurrentTrack {
            key: key.clone(),
            details: details.clone(),
        });

        let outcome = self.shared.notifier.notify_now_playing(&details).await;
        debug!(?outcome, "Initial now-playing update");

        info!(title = %details.title, "Starting periodic Now Playing task");
        state.update_task = Some(UpdateTask::spawn(Arc::clone(&self.shared), key));
    }

    async fn handle_pause(&self) {
        let mut state = self.shared.state.lock().await;

        if state.pause_timer.is_some() {
            debug!("Received 'media.pause' but pause timer already active");
            return;
        }

        if !state.loop_active() {
            debug!("Received 'media.pause' but no active Now Playing task");
            return;
        }

        let timeout = self.shared.timing.pause_timeout;
        info!("Received 'media.pause'. Starting {} sec timeout.", timeout.as_secs());
        state.pause_timer = Some(PauseTimer::arm(self.clone(), timeout));
    }

    /// Tear down the session: cancel the loop, disarm the timer, clear the track
    pub async fn stop(&self, reason: &str) {
        let mut state = self.shared.state.lock().await;
        Self::teardown(&mut state, reason).await;
    }

    /// Teardown on process shutdown
    pub async fn shutdown(&self) {
        self.stop("application shutdown").await;
        info!("Session shut down");
    }

    /// Called by an expired pause timer
    ///
    /// Tears down only if this timer is still the armed one. Disarming always
    /// cancels the token under the lock, so a timer that lost a race with a
    /// resume sees its token cancelled here and backs off.
    async fn expire_pause_timer(&self, token: &CancellationToken) {
        let mut state = self.shared.state.lock().await;

        if token.is_cancelled() {
            debug!("Pause timer fired after being disarmed; ignoring");
            return;
        }

        info!("Pause timer expired. Stopping periodic updates.");
        Self::teardown(&mut state, "pause timeout").await;
    }

    async fn teardown(state: &mut SessionState, reason: &str) {
        state.disarm_pause_timer();

        if let Some(task) = state.update_task.take() {
            task.cancel_and_wait(LOOP_CANCEL_WAIT).await;
            info!(reason, "Cancelled periodic Now Playing task");
        }

        state.current = None;
        debug!(reason, "Periodic update state cleared");
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.state.lock().await;

        let pause_timer_armed = state.pause_timer.is_some();
        let phase = if pause_timer_armed {
            SessionPhase::PausedPendingTimeout
        } else if state.current.is_some() && state.loop_active() {
            SessionPhase::Playing
        } else {
            SessionPhase::Idle
        };

        SessionSnapshot {
            phase,
            track: state.current.as_ref().map(|c| c.details.clone()),
            update_loop_active: state.loop_active(),
            pause_timer_armed,
            live_update_loops: self.shared.live_loops.load(Ordering::SeqCst),
        }
    }
}
