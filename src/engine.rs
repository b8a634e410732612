use crate::error::Result;
use std::path::{Path, PathBuf};

/// Reference image plus the threshold used to confirm a potential match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReference {
    pub path: PathBuf,
    pub noise_threshold: f64,
}

/// Configuration surface of the external image-processing engine.
///
/// The engine reports its findings through the
/// [`DetectionBus`](crate::events::DetectionBus); this trait only covers the
/// calls that set up what it should be looking for. Passing `None` clears
/// the previously installed setting.
pub trait ImageEngine: Send {
    fn install_match_reference(&mut self, reference: Option<&MatchReference>) -> Result<()>;

    fn install_motion_mask(&mut self, mask: Option<&Path>) -> Result<()>;

    fn enable_motion(&mut self, enabled: bool) -> Result<()>;
}

/// Engine that accepts every setting and never produces events
#[derive(Debug, Default)]
pub struct NullEngine;

impl ImageEngine for NullEngine {
    fn install_match_reference(&mut self, _reference: Option<&MatchReference>) -> Result<()> {
        Ok(())
    }

    fn install_motion_mask(&mut self, _mask: Option<&Path>) -> Result<()> {
        Ok(())
    }

    fn enable_motion(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }
}
