//! One-shot pause timeout

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::SessionManager;

/// Armed pause timer
///
/// Disarming cancels the token; the task is never aborted because on
/// expiry it runs the teardown itself.
pub(crate) struct PauseTimer {
    cancel: CancellationToken,
}

impl PauseTimer {
    /// Schedule session teardown after `delay` unless disarmed first
    pub(crate) fn arm(session: SessionManager, delay: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            session.expire_pause_timer(&token).await;
        });

        Self { cancel }
    }

    pub(crate) fn disarm(self) {
        self.cancel.cancel();
    }
}
