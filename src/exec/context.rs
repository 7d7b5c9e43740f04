use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a bounded operation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    DeadlineExceeded,
    Cancelled,
}

/// Deadline plus cancellation shared by every step of one workflow run.
///
/// The deadline is fixed when the context is created; steps do not get a
/// fresh budget each.
#[derive(Debug, Clone)]
pub struct RunContext {
    deadline: Option<Instant>,
    started: Instant,
    cancel: CancellationToken,
}

impl RunContext {
    /// Context with no deadline that is only stopped by cancellation.
    pub fn background() -> Self {
        Self {
            deadline: None,
            started: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            started: Instant::now(),
            cancel,
        }
    }

    /// Derive a child context expiring after `timeout`, or at the parent's
    /// deadline if that comes first. Cancelling the parent cancels the child.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let now = Instant::now();
        let candidate = now + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            started: now,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Non-blocking check of whether the context is already finished.
    pub fn interruption(&self) -> Option<Interruption> {
        if self.cancel.is_cancelled() {
            return Some(Interruption::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the deadline elapses or the context is cancelled.
    pub async fn done(&self) -> Interruption {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Interruption::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Interruption::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.cancelled().await;
                Interruption::Cancelled
            }
        }
    }
}
