//! Early-stop signalling for a run.
//!
//! A run stops early when its deadline passes or when [`RunControl::cancel`]
//! is called (the binary wires this to Ctrl-C). Stopping never skips the
//! final save: whatever was accumulated is still persisted and published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct RunControl {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    /// Creates a control whose deadline is `budget` from now, if given.
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            deadline: budget.map(|b| Instant::now() + b),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once the run has been cancelled or its deadline has passed.
    pub fn is_stopped(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_stops() {
        let control = RunControl::default();
        assert!(!control.is_stopped());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let control = RunControl::new(None);
        let handle = control.clone();
        handle.cancel();
        assert!(control.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let control = RunControl::new(Some(Duration::from_secs(5)));
        assert!(!control.is_stopped());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(control.is_stopped());
    }
}
