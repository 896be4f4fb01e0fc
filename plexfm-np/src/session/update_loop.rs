//! Periodic now-playing update loop
//!
//! One loop runs per playing track. Each cycle re-reads the track details
//! under the session lock, releases it, notifies, then sleeps. Notifier
//! failures are best-effort and never stop the loop; missing or mismatched
//! details end the loop without touching the rest of the session.
//! Cancellation is observed at every suspension point.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use plexfm_common::config::FirstRepeat;

use super::{NotifyOutcome, SessionError, SessionShared, SessionState, TrackDetails, TrackKey};

/// Handle to a running update loop
pub(crate) struct UpdateTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl UpdateTask {
    /// Spawn a loop bound to `key`
    pub(crate) fn spawn(shared: Arc<SessionShared>, key: TrackKey) -> Self {
        let cancel = CancellationToken::new();
        // Counted from spawn so the loop is visible before its first poll
        let guard = LiveLoopGuard::enter(Arc::clone(&shared));
        let handle = tokio::spawn(run_update_loop(shared, key, cancel.clone(), guard));
        Self { cancel, handle }
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the loop and wait for it to terminate
    ///
    /// The loop honours cancellation at every await, so it normally exits
    /// at once. If it has not finished within `wait`, it is aborted and
    /// awaited again; either way it has stopped when this returns.
    pub(crate) async fn cancel_and_wait(self, wait: Duration) {
        let UpdateTask { cancel, mut handle } = self;
        cancel.cancel();

        match tokio::time::timeout(wait, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => error!("Periodic update loop panicked: {}", e),
            Err(_) => {
                warn!(
                    "Periodic update loop did not stop within {:?}; aborting",
                    wait
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

/// Keeps `SessionShared::live_loops` accurate, including on abort
struct LiveLoopGuard {
    shared: Arc<SessionShared>,
}

impl LiveLoopGuard {
    fn enter(shared: Arc<SessionShared>) -> Self {
        shared.live_loops.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for LiveLoopGuard {
    fn drop(&mut self) {
        self.shared.live_loops.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Details the loop should send, if they still belong to its track
fn current_details(state: &SessionState, key: &TrackKey) -> Result<TrackDetails, SessionError> {
    match &state.current {
        Some(current) if current.key == *key => {
            current.details.validate()?;
            Ok(current.details.clone())
        }
        Some(_) => Err(SessionError::TrackMismatch(key.clone())),
        None => Err(SessionError::MissingDetails),
    }
}

/// Sleep for `duration`; `false` if cancelled first
async fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn run_update_loop(
    shared: Arc<SessionShared>,
    key: TrackKey,
    cancel: CancellationToken,
    _guard: LiveLoopGuard,
) {
    let interval = shared.timing.update_interval;

    if shared.timing.first_repeat == FirstRepeat::AfterInterval
        && !sleep_unless_cancelled(&cancel, interval).await
    {
        info!("Periodic update loop cancelled");
        return;
    }

    loop {
        let details = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Periodic update loop cancelled");
                break;
            }
            state = shared.state.lock() => current_details(&state, &key),
        };

        let details = match details {
            Ok(details) => details,
            Err(e) => {
                error!(track = %key, "Error in periodic update loop: {}. Stopping loop.", e);
                break;
            }
        };

        debug!(title = %details.title, "Periodic update loop: sending update");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Periodic update loop cancelled");
                break;
            }
            outcome = shared.notifier.notify_now_playing(&details) => outcome,
        };

        if outcome == NotifyOutcome::Failed {
            debug!("Now-playing update failed; next attempt in {:?}", interval);
        }

        if !sleep_unless_cancelled(&cancel, interval).await {
            info!("Periodic update loop cancelled");
            break;
        }
    }

    debug!("Periodic update loop finished");
}
