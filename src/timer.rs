use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};

/// The deadline of one client.
///
/// Expires once the configured duration has elapsed since the client started, or as
/// soon as the benchmark is canceled. Every blocking step of a client runs through
/// [`Timer::guard`] so an expiring timer interrupts it.
pub(crate) struct Timer {
    deadline: Instant,
    canceled: watch::Receiver<bool>,
    expired: bool,
}

// Stands in for a deadline too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

impl Timer {
    pub(crate) fn start(duration: Duration, canceled: watch::Receiver<bool>) -> Timer {
        let now = Instant::now();
        let deadline = now
            .checked_add(duration)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Timer {
            deadline,
            canceled,
            expired: false,
        }
    }

    /// Once this returns `true` it never returns `false` again.
    pub(crate) fn expired(&mut self) -> bool {
        if !self.expired && (Instant::now() >= self.deadline || *self.canceled.borrow()) {
            self.expired = true;
        }
        self.expired
    }

    /// Drive `fut` to completion unless the timer expires first, in which case `fut`
    /// is dropped and `None` is returned.
    pub(crate) async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.expired() {
            return None;
        }

        let deadline = self.deadline;
        let output = tokio::select! {
            biased;
            _ = time::sleep_until(deadline) => None,
            _ = wait_canceled(&mut self.canceled) => None,
            output = fut => Some(output),
        };
        if output.is_none() {
            self.expired = true;
        }
        output
    }
}

// Resolves once the benchmark is canceled, never if it isn't.
async fn wait_canceled(canceled: &mut watch::Receiver<bool>) {
    loop {
        if *canceled.borrow_and_update() {
            return;
        }
        if canceled.changed().await.is_err() {
            // Nobody can cancel anymore.
            futures::future::pending::<()>().await;
        }
    }
}
