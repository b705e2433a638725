//! One-shot resettable deadlines.
//!
//! A [`Timer`] only records when it fires; the event loop waits on
//! [`wait`] and calls back into the owner once the deadline passes.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Timer {
    duration: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    /// (Re)start the countdown from now.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.duration);
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Resolve at `deadline`, or never when there is none.
pub async fn wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_deadline() {
        let mut timer = Timer::new(Duration::from_secs(5));
        timer.arm();
        let start = Instant::now();
        wait(timer.deadline()).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_deadline() {
        let mut timer = Timer::new(Duration::from_secs(5));
        timer.arm();
        let first = timer.deadline().unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        timer.arm();
        assert_eq!(timer.deadline().unwrap() - first, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_timer_never_fires() {
        let mut timer = Timer::new(Duration::from_secs(1));
        timer.arm();
        timer.clear();
        assert!(!timer.is_armed());
        let fired = tokio::time::timeout(Duration::from_secs(10), wait(timer.deadline())).await;
        assert!(fired.is_err());
    }
}
