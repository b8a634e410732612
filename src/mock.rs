//! Stand-ins for the capture pipeline and image engine, for running waits
//! and the test-pattern control without video hardware.

use crate::capture::CaptureSource;
use crate::engine::{ImageEngine, MatchReference};
use crate::error::{Result, StbtError};
use crate::remote::RemoteControl;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Counters kept by [`MockCaptureSource`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceActivity {
    pub teardowns: u32,
    pub rebuilds: u32,
    pub pattern: Option<u8>,
}

/// Capture source that only counts what was asked of it
#[derive(Debug, Clone, Default)]
pub struct MockCaptureSource {
    activity: Arc<Mutex<SourceActivity>>,
    test_pattern: bool,
    fail_rebuild: bool,
}

impl MockCaptureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that behaves like a test-pattern generator
    pub fn with_test_pattern() -> Self {
        Self {
            test_pattern: true,
            ..Self::default()
        }
    }

    /// A source whose rebuild always fails, like a dead capture device
    pub fn failing_rebuild() -> Self {
        Self {
            fail_rebuild: true,
            ..Self::default()
        }
    }

    /// Snapshot of the counters; clones share them
    pub fn activity(&self) -> SourceActivity {
        self.activity.lock().clone()
    }
}

#[async_trait]
impl CaptureSource for MockCaptureSource {
    async fn teardown(&mut self) -> Result<()> {
        self.activity.lock().teardowns += 1;
        debug!("Mock source torn down");
        Ok(())
    }

    async fn rebuild(&mut self) -> Result<()> {
        self.activity.lock().rebuilds += 1;
        if self.fail_rebuild {
            return Err(StbtError::system("mock capture device is gone"));
        }
        debug!("Mock source rebuilt");
        Ok(())
    }

    fn has_test_pattern(&self) -> bool {
        self.test_pattern
    }

    fn set_pattern(&mut self, pattern: u8) -> Result<()> {
        if !self.test_pattern {
            return Err(StbtError::configuration("mock source has no test pattern"));
        }
        self.activity.lock().pattern = Some(pattern);
        Ok(())
    }
}

/// A configuration call received by [`MockImageEngine`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    MatchReference(Option<MatchReference>),
    MotionMask(Option<PathBuf>),
    EnableMotion(bool),
}

/// Image engine that records configuration calls in order
#[derive(Debug, Clone, Default)]
pub struct MockImageEngine {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl MockImageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far; clones share the log
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Reference currently installed, following the call log
    pub fn installed_reference(&self) -> Option<MatchReference> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|call| match call {
                EngineCall::MatchReference(reference) => Some(reference.clone()),
                _ => None,
            })
            .flatten()
    }

    /// Whether motion detection is currently enabled
    pub fn motion_enabled(&self) -> bool {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|call| match call {
                EngineCall::EnableMotion(enabled) => Some(*enabled),
                _ => None,
            })
            .unwrap_or(false)
    }
}

impl ImageEngine for MockImageEngine {
    fn install_match_reference(&mut self, reference: Option<&MatchReference>) -> Result<()> {
        self.calls
            .lock()
            .push(EngineCall::MatchReference(reference.cloned()));
        Ok(())
    }

    fn install_motion_mask(&mut self, mask: Option<&Path>) -> Result<()> {
        self.calls
            .lock()
            .push(EngineCall::MotionMask(mask.map(Path::to_path_buf)));
        Ok(())
    }

    fn enable_motion(&mut self, enabled: bool) -> Result<()> {
        self.calls.lock().push(EngineCall::EnableMotion(enabled));
        Ok(())
    }
}

/// Remote control that remembers every key it was asked to press
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    pressed: Arc<Mutex<Vec<String>>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys pressed so far, oldest first; clones share the list
    pub fn pressed(&self) -> Vec<String> {
        self.pressed.lock().clone()
    }
}

#[async_trait]
impl RemoteControl for MockRemote {
    async fn press(&mut self, key: &str) -> Result<()> {
        debug!("Mock press: {}", key);
        self.pressed.lock().push(key.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
