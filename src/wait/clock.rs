use std::time::Duration;
use tokio::time::Instant;

/// Timeout budget of one wait, which can be stopped while the video
/// source is being restarted.
#[derive(Debug, Clone)]
pub struct WaitClock {
    timeout: Duration,
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl WaitClock {
    /// Start counting down `timeout` from now
    pub fn start(timeout: Duration) -> Self {
        Self {
            timeout,
            started: Instant::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += paused_at.elapsed();
        }
    }

    /// Time counted against the budget so far
    pub fn elapsed(&self) -> Duration {
        let now = self.paused_at.unwrap_or_else(Instant::now);
        now.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }

    /// When the budget runs out; `None` while paused
    pub fn deadline(&self) -> Option<Instant> {
        if self.is_paused() {
            None
        } else {
            Some(self.started + self.timeout + self.paused_total)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_paused_time_is_not_counted() {
        let mut clock = WaitClock::start(Duration::from_secs(10));
        let original_deadline = clock.deadline().unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        clock.pause();
        assert!(clock.deadline().is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.elapsed(), Duration::from_secs(3));

        clock.resume();
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
        assert_eq!(clock.deadline().unwrap(), original_deadline + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_are_idempotent() {
        let mut clock = WaitClock::start(Duration::from_secs(1));
        clock.resume();
        clock.pause();
        tokio::time::advance(Duration::from_millis(500)).await;
        clock.pause();
        clock.resume();
        clock.resume();

        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(clock.timeout(), Duration::from_secs(1));
    }
}
