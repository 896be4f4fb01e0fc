//! Seam between the session and the now-playing service

use async_trait::async_trait;

use super::TrackDetails;

/// Result of one now-playing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Accepted by the remote service
    Sent,
    /// Not attempted: no usable credentials
    Skipped,
    /// Attempted and failed; already logged by the notifier
    Failed,
}

/// Sends now-playing notifications
///
/// Implementations never return errors to the session: failures are
/// logged and reported as [`NotifyOutcome::Failed`]. Calls may arrive
/// concurrently from the play handler and the periodic loop.
#[async_trait]
pub trait NowPlayingNotifier: Send + Sync {
    async fn notify_now_playing(&self, track: &TrackDetails) -> NotifyOutcome;
}
