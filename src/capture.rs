use crate::error::{Result, StbtError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Control surface of the video capture pipeline's source stage
#[async_trait]
pub trait CaptureSource: Send {
    /// Stop the source and unlink it from the rest of the pipeline
    async fn teardown(&mut self) -> Result<()>;

    /// Build a fresh source, link it back in and set it playing
    async fn rebuild(&mut self) -> Result<()>;

    /// Whether the source is a test-pattern generator
    fn has_test_pattern(&self) -> bool {
        false
    }

    /// Select the test pattern to display
    fn set_pattern(&mut self, pattern: u8) -> Result<()> {
        Err(StbtError::configuration(format!(
            "Capture source has no test pattern element (requested pattern {})",
            pattern
        )))
    }
}

/// Capture source shared between the test-pattern control and recovery.
///
/// Recovery holds the lock for a whole restart, which is what keeps other
/// users off the source while it is being rebuilt.
pub type SharedSource = Arc<Mutex<Box<dyn CaptureSource>>>;

pub fn shared_source<S: CaptureSource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}
