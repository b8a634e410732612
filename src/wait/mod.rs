mod clock;
mod confirm;
mod engine;


pub use clock::WaitClock;
pub use confirm::{MatchConfirmation, MotionConfirmation};
pub use engine::WaitEngine;

use crate::config::WaitConfig;
use crate::error::{Result, UiTestFailure};
use crate::frame::Position;
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of a wait. Timing out is an expected result, not an error.
#[derive(Debug, Clone)]
pub enum WaitResult {
    Matched { position: Position },
    MotionDetected,
    TimedOut(UiTestFailure),
}

impl WaitResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. } | Self::MotionDetected)
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            Self::Matched { position } => Some(*position),
            _ => None,
        }
    }

    /// Turn a timeout into an `Err` so test scripts can use `?`
    pub fn into_result(self) -> std::result::Result<Self, UiTestFailure> {
        match self {
            Self::TimedOut(failure) => Err(failure),
            other => Ok(other),
        }
    }
}

/// Parameters of one `wait_for_match` call
#[derive(Debug, Clone, PartialEq)]
pub struct MatchParameters {
    pub image: PathBuf,
    pub timeout: Duration,
    pub consecutive_matches: u32,
    pub noise_threshold: f64,
}

impl MatchParameters {
    /// Search for `image` with the configured defaults
    pub fn from_config<P: Into<PathBuf>>(image: P, config: &WaitConfig) -> Result<Self> {
        Ok(Self {
            image: image.into(),
            timeout: config.timeout()?,
            consecutive_matches: config.consecutive_matches,
            noise_threshold: config.noise_threshold,
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn consecutive_matches(mut self, count: u32) -> Self {
        self.consecutive_matches = count;
        self
    }

    pub fn noise_threshold(mut self, threshold: f64) -> Self {
        self.noise_threshold = threshold;
        self
    }
}

/// Parameters of one `wait_for_motion` call
#[derive(Debug, Clone, PartialEq)]
pub struct MotionParameters {
    pub mask: Option<PathBuf>,
    pub timeout: Duration,
    pub consecutive_frames: u32,
}

impl MotionParameters {
    pub fn from_config(config: &WaitConfig) -> Result<Self> {
        Ok(Self {
            mask: None,
            timeout: config.timeout()?,
            consecutive_frames: config.consecutive_frames,
        })
    }

    pub fn mask<P: Into<PathBuf>>(mut self, mask: P) -> Self {
        self.mask = Some(mask.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn consecutive_frames(mut self, count: u32) -> Self {
        self.consecutive_frames = count;
        self
    }
}
