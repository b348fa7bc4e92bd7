//! Trailing-edge debounce for autosave.
//!
//! One pending deadline per session. Every local edit restarts the
//! timer; when the window elapses uninterrupted, the session loop gets
//! exactly one tick carrying whatever content the last edit left
//! behind. Built as a deadline the owning event loop selects on, not a
//! spawned timer task, so cancellation is a plain field reset.

use std::time::Duration;

use tokio::time::Instant;

/// Default autosave window.
pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(1200);

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Restart the window. Any previously pending deadline is replaced.
    pub fn schedule(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    /// Clear any pending deadline without firing.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the pending deadline elapses; pends forever while
    /// nothing is scheduled. Callers must invoke [`Self::fire`] after
    /// this resolves, or the next poll resolves immediately again.
    pub async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Consume the pending deadline. Returns whether one was armed.
    pub fn fire(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}
