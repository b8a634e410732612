use crate::capture::SharedSource;
use crate::config::RecoveryConfig;
use crate::error::Result;
use crate::events::{HealthNotice, HealthReceiver, TransportHealthEvent};
use crate::wait::WaitClock;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

/// What to do once an underrun has outlasted its grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Tear the source down and build it again
    Restart { attempt: u32 },
    /// Too many restarts in a row; leave the source alone
    GiveUp { failures: u32 },
}

/// Observable recovery state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryState {
    /// Grace periods that expired since video was last seen running
    pub consecutive_failures: u32,
    /// A restart is in progress
    pub suspended: bool,
}

/// Masks short video-source interruptions so they don't show up as
/// false timeouts.
///
/// An underrun arms a grace timer; if the source reports running again
/// before it expires nothing happens. Otherwise the source is restarted,
/// with the caller's wait clock paused, and monitoring continues. After
/// `max_attempts` restarts without the video coming back, recovery stops
/// and the pending wait simply times out.
pub struct RecoveryController {
    grace_period: Duration,
    settle_period: Duration,
    max_attempts: u32,
    health: HealthReceiver,
    source: Option<SharedSource>,
    state: RecoveryState,
    grace_deadline: Option<Instant>,
    restarts: u64,
}

impl RecoveryController {
    pub fn new(
        config: &RecoveryConfig,
        health: HealthReceiver,
        source: Option<SharedSource>,
    ) -> Result<Self> {
        Ok(Self {
            grace_period: config.grace_period()?,
            settle_period: config.settle_period()?,
            max_attempts: config.max_attempts,
            health,
            source,
            state: RecoveryState::default(),
            grace_deadline: None,
            restarts: 0,
        })
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// When the armed grace timer fires, if one is armed
    pub fn grace_deadline(&self) -> Option<Instant> {
        self.grace_deadline
    }

    /// Total restarts attempted over the controller's life
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    fn is_exhausted(&self) -> bool {
        self.state.consecutive_failures > self.max_attempts
    }

    /// Wait for the next health notice from the capture source
    pub async fn next_health(&mut self) -> HealthNotice {
        match self.health.recv().await {
            Some(notice) => notice,
            // Every bus handle is gone, so nothing will ever arrive
            None => std::future::pending().await,
        }
    }

    /// Apply one health notice
    pub fn on_health(&mut self, notice: HealthNotice) {
        match notice.event {
            TransportHealthEvent::Underrun => {
                if self.grace_deadline.is_some() {
                    trace!("underrun: I already saw a recent underrun; ignoring");
                } else if self.is_exhausted() {
                    trace!("underrun: recovery exhausted until video runs again; ignoring");
                } else {
                    debug!("underrun: scheduling source restart in {:?}", self.grace_period);
                    self.grace_deadline = Some(notice.at + self.grace_period);
                }
            }
            TransportHealthEvent::Running => {
                if self.grace_deadline.take().is_some() {
                    debug!("running: cancelling underrun timer");
                } else {
                    trace!("running: no outstanding underrun timer");
                }
                if self.state.consecutive_failures > 0 {
                    info!(
                        "Video is running again after {} failed recovery cycle(s)",
                        self.state.consecutive_failures
                    );
                }
                self.state.consecutive_failures = 0;
            }
        }
    }

    /// The grace timer fired: count the failure and decide what to do
    pub fn on_grace_expired(&mut self) -> RecoveryAction {
        self.grace_deadline = None;
        self.state.consecutive_failures += 1;

        if self.state.consecutive_failures <= self.max_attempts {
            RecoveryAction::Restart {
                attempt: self.state.consecutive_failures,
            }
        } else {
            RecoveryAction::GiveUp {
                failures: self.state.consecutive_failures,
            }
        }
    }

    /// Handle an expired grace timer on behalf of the wait owning `clock`
    pub async fn recover(&mut self, clock: &mut WaitClock) {
        match self.on_grace_expired() {
            RecoveryAction::Restart { attempt } => self.restart_source(clock, attempt).await,
            RecoveryAction::GiveUp { failures } => {
                error!(
                    "Video still lost after {} restart attempts; giving up on recovery",
                    failures - 1
                );
            }
        }
    }

    /// Restart the capture source while the wait clock is stopped
    async fn restart_source(&mut self, clock: &mut WaitClock, attempt: u32) {
        self.state.suspended = true;
        self.restarts += 1;
        clock.pause();

        match &self.source {
            Some(source) => {
                let mut source = source.lock().await;

                warn!(
                    "Attempting to recover from video loss ({}/{}): stopping source pipeline and waiting {:?}...",
                    attempt, self.max_attempts, self.settle_period
                );
                if let Err(e) = source.teardown().await {
                    warn!("Failed to tear down source pipeline: {}", e);
                }

                sleep(self.settle_period).await;

                info!("Restarting source pipeline...");
                match source.rebuild().await {
                    Ok(()) => info!("Restarted source pipeline"),
                    Err(e) => error!("Failed to rebuild source pipeline: {}", e),
                }
            }
            None => warn!("Video lost but there is no capture source to restart"),
        }

        // Keep watching: no "running" within the grace period is another failure
        self.grace_deadline = Some(Instant::now() + self.grace_period);

        clock.resume();
        self.state.suspended = false;
    }
}

impl std::fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryController")
            .field("state", &self.state)
            .field("grace_deadline", &self.grace_deadline)
            .field("restarts", &self.restarts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::shared_source;
    use crate::config::StbtConfig;
    use crate::events::DetectionBus;
    use crate::mock::MockCaptureSource;

    fn notice(event: TransportHealthEvent) -> HealthNotice {
        HealthNotice {
            event,
            at: Instant::now(),
        }
    }

    fn controller(source: Option<SharedSource>) -> RecoveryController {
        let (_bus, health) = DetectionBus::new(4);
        RecoveryController::new(&StbtConfig::default().recovery, health, source).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_underrun_arms_grace_timer_once() {
        let mut recovery = controller(None);
        let first = notice(TransportHealthEvent::Underrun);
        recovery.on_health(first);
        assert_eq!(recovery.grace_deadline(), Some(first.at + Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(1)).await;
        recovery.on_health(notice(TransportHealthEvent::Underrun));
        assert_eq!(recovery.grace_deadline(), Some(first.at + Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_cancels_timer_and_resets_failures() {
        let mut recovery = controller(None);
        recovery.on_health(notice(TransportHealthEvent::Underrun));
        assert_eq!(recovery.on_grace_expired(), RecoveryAction::Restart { attempt: 1 });
        recovery.on_health(notice(TransportHealthEvent::Underrun));

        recovery.on_health(notice(TransportHealthEvent::Running));

        assert_eq!(recovery.grace_deadline(), None);
        assert_eq!(recovery.state().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_failures() {
        let mut recovery = controller(None);

        for attempt in 1..=3 {
            assert_eq!(recovery.on_grace_expired(), RecoveryAction::Restart { attempt });
        }
        assert_eq!(recovery.on_grace_expired(), RecoveryAction::GiveUp { failures: 4 });

        // Further underruns are ignored until the video runs again
        recovery.on_health(notice(TransportHealthEvent::Underrun));
        assert_eq!(recovery.grace_deadline(), None);

        recovery.on_health(notice(TransportHealthEvent::Running));
        recovery.on_health(notice(TransportHealthEvent::Underrun));
        assert!(recovery.grace_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_pauses_clock_and_rearms_monitoring() {
        let source = MockCaptureSource::new();
        let mut recovery = controller(Some(shared_source(source.clone())));
        let mut clock = WaitClock::start(Duration::from_secs(10));

        recovery.on_health(notice(TransportHealthEvent::Underrun));
        tokio::time::advance(Duration::from_secs(2)).await;

        let before = Instant::now();
        recovery.recover(&mut clock).await;

        assert_eq!(Instant::now() - before, Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
        assert_eq!(source.activity().teardowns, 1);
        assert_eq!(source.activity().rebuilds, 1);
        assert_eq!(recovery.grace_deadline(), Some(Instant::now() + Duration::from_secs(2)));
        assert!(!recovery.state().suspended);
        assert_eq!(recovery.state().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rebuild_counts_as_failed_cycle() {
        let source = MockCaptureSource::failing_rebuild();
        let mut recovery = controller(Some(shared_source(source.clone())));
        let mut clock = WaitClock::start(Duration::from_secs(10));

        recovery.recover(&mut clock).await;

        assert_eq!(source.activity().rebuilds, 1);
        assert_eq!(recovery.restarts(), 1);
        assert!(recovery.grace_deadline().is_some());
    }
}
