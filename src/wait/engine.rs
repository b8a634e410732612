use super::clock::WaitClock;
use super::confirm::{MatchConfirmation, MotionConfirmation};
use super::{MatchParameters, MotionParameters, WaitResult};
use crate::capture::SharedSource;
use crate::config::StbtConfig;
use crate::engine::{ImageEngine, MatchReference};
use crate::error::{Result, StbtError, UiTestFailure};
use crate::events::{DetectionBus, DetectionEvent, EventFilter, HealthReceiver, Received};
use crate::recovery::{RecoveryController, RecoveryState};
use std::path::PathBuf;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Turns the engine's stream of per-frame results into blocking
/// `wait_for_match` / `wait_for_motion` calls.
///
/// Only one wait can run at a time (`&mut self`): the installed reference
/// is engine-wide state that belongs to the running call.
pub struct WaitEngine {
    engine: Box<dyn ImageEngine>,
    bus: DetectionBus,
    recovery: RecoveryController,
}

/// What a running wait has installed on the engine
enum Search {
    Match {
        reference: MatchReference,
        confirm: MatchConfirmation,
    },
    Motion {
        mask: Option<PathBuf>,
        confirm: MotionConfirmation,
    },
}

/// Clears whatever a wait installed on the engine when the wait ends,
/// however it ends
struct InstalledSearch<'a> {
    engine: &'a mut Box<dyn ImageEngine>,
    motion: bool,
}

impl<'a> InstalledSearch<'a> {
    fn install(engine: &'a mut Box<dyn ImageEngine>, search: &Search) -> Result<Self> {
        match search {
            Search::Match { reference, .. } => {
                engine.install_match_reference(Some(reference))?;
                Ok(Self {
                    engine,
                    motion: false,
                })
            }
            Search::Motion { mask, .. } => {
                let mut installed = Self {
                    engine,
                    motion: true,
                };
                installed.engine.install_motion_mask(mask.as_deref())?;
                installed.engine.enable_motion(true)?;
                Ok(installed)
            }
        }
    }
}

impl Drop for InstalledSearch<'_> {
    fn drop(&mut self) {
        let cleared = if self.motion {
            self.engine
                .install_motion_mask(None)
                .and_then(|_| self.engine.enable_motion(false))
        } else {
            self.engine.install_match_reference(None)
        };
        if let Err(e) = cleared {
            warn!("Failed to clear search from image engine: {}", e);
        }
    }
}

/// One loop iteration's wakeup
enum Step {
    Health(crate::events::HealthNotice),
    GraceExpired,
    Received(Received),
    TimedOut,
}

impl WaitEngine {
    pub fn new(
        config: &StbtConfig,
        engine: Box<dyn ImageEngine>,
        bus: DetectionBus,
        health: HealthReceiver,
        source: Option<SharedSource>,
    ) -> Result<Self> {
        Ok(Self {
            engine,
            bus,
            recovery: RecoveryController::new(&config.recovery, health, source)?,
        })
    }

    pub fn bus(&self) -> &DetectionBus {
        &self.bus
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    /// Wait for `params.image` to match at the same position in
    /// `params.consecutive_matches` frames in a row
    pub async fn wait_for_match(&mut self, params: MatchParameters) -> Result<WaitResult> {
        if params.consecutive_matches == 0 {
            return Err(StbtError::configuration("consecutive_matches must be at least 1"));
        }
        info!("Searching for {}", params.image.display());

        let search = Search::Match {
            reference: MatchReference {
                path: params.image,
                noise_threshold: params.noise_threshold,
            },
            confirm: MatchConfirmation::new(params.consecutive_matches),
        };
        self.run(search, WaitClock::start(params.timeout)).await
    }

    /// Wait for motion (inside `params.mask`, if given) in
    /// `params.consecutive_frames` frames in a row
    pub async fn wait_for_motion(&mut self, params: MotionParameters) -> Result<WaitResult> {
        if params.consecutive_frames == 0 {
            return Err(StbtError::configuration("consecutive_frames must be at least 1"));
        }
        if let Some(mask) = &params.mask {
            debug!("Using mask {}", mask.display());
        }
        info!(
            "Waiting for {} consecutive frames with motion",
            params.consecutive_frames
        );

        let search = Search::Motion {
            mask: params.mask,
            confirm: MotionConfirmation::new(params.consecutive_frames),
        };
        self.run(search, WaitClock::start(params.timeout)).await
    }

    async fn run(&mut self, mut search: Search, mut clock: WaitClock) -> Result<WaitResult> {
        let Self {
            engine,
            bus,
            recovery,
        } = self;

        // Subscribe before installing so the first result can't be missed.
        // Both the subscription and the installed search are released on
        // every way out of this function.
        let filter = match &search {
            Search::Match { .. } => EventFilter::match_search(),
            Search::Motion { .. } => EventFilter::motion_search(),
        };
        let mut events = bus.subscribe(filter, "wait");
        let _installed = InstalledSearch::install(engine, &search)?;

        loop {
            let grace = recovery.grace_deadline();
            let deadline = clock.deadline();

            let step = tokio::select! {
                biased;
                notice = recovery.next_health() => Step::Health(notice),
                _ = sleep_until_opt(grace) => Step::GraceExpired,
                received = events.recv() => Step::Received(received),
                _ = sleep_until_opt(deadline) => Step::TimedOut,
            };

            match step {
                Step::Health(notice) => recovery.on_health(notice),
                Step::GraceExpired => recovery.recover(&mut clock).await,
                Step::TimedOut => return Ok(timed_out(&search, bus, &clock)),
                Step::Received(Received::Lagged(_)) => {
                    // Frames were skipped, so the streak is no longer consecutive
                    match &mut search {
                        Search::Match { confirm, .. } => confirm.reset(),
                        Search::Motion { confirm, .. } => confirm.reset(),
                    }
                }
                Step::Received(Received::Closed) => {
                    return Err(StbtError::system("Detection event bus closed during wait"));
                }
                Step::Received(Received::Event(event)) => {
                    // The biased select prefers a backlog of events over the
                    // deadline; results for frames read too late don't count
                    if clock.deadline().is_some_and(|deadline| Instant::now() >= deadline) {
                        return Ok(timed_out(&search, bus, &clock));
                    }
                    if let Some(result) = handle_event(&mut search, event)? {
                        return Ok(result);
                    }
                }
            }
        }
    }
}

fn handle_event(search: &mut Search, event: DetectionEvent) -> Result<Option<WaitResult>> {
    match (search, event) {
        (Search::Match { reference, confirm }, DetectionEvent::Match(m)) => {
            Ok(confirm.observe(&m).map(|position| {
                info!("MATCHED {} at {}", reference.path.display(), position);
                WaitResult::Matched { position }
            }))
        }
        (Search::Motion { confirm, .. }, DetectionEvent::Motion(m)) => {
            if confirm.observe(&m) {
                info!("Motion detected.");
                Ok(Some(WaitResult::MotionDetected))
            } else {
                Ok(None)
            }
        }
        (_, DetectionEvent::ReferenceLoadFailed { path, message }) => {
            let what = path
                .map(|p| format!("'{}'", p.display()))
                .unwrap_or_else(|| "reference image".to_string());
            Err(StbtError::configuration(format!(
                "Image engine failed to load {}: {}",
                what, message
            )))
        }
        (_, DetectionEvent::Error { source, message }) => Err(StbtError::Pipeline {
            source_name: source,
            message,
        }),
        _ => Ok(None),
    }
}

fn timed_out(search: &Search, bus: &DetectionBus, clock: &WaitClock) -> WaitResult {
    info!("Timed out after {:.1}s", clock.elapsed().as_secs_f64());
    let screenshot = bus.latest_frame();
    let failure = match search {
        Search::Match { reference, .. } => UiTestFailure::MatchTimeout {
            screenshot,
            expected: reference.path.clone(),
            elapsed: clock.elapsed(),
            timeout: clock.timeout(),
        },
        Search::Motion { mask, .. } => UiTestFailure::MotionTimeout {
            screenshot,
            mask: mask.clone(),
            elapsed: clock.elapsed(),
            timeout: clock.timeout(),
        },
    };
    WaitResult::TimedOut(failure)
}

/// Sleep until `deadline`, or forever when there is none
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
