use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel layout of a frame snapshot, as reported by the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Packed 8-bit BGR, what the template matcher works on
    Bgr24,
    /// Packed YUV 4:2:2
    Yuyv,
    /// Anything else; kept as opaque bytes
    Other,
}

/// Snapshot of the most recent video frame.
///
/// This crate never decodes frames. A snapshot is only carried around so
/// that a failed wait can hand the caller what the screen looked like.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Stream timestamp in nanoseconds, as reported by the pipeline
    pub timestamp: i64,
    /// Raw frame data (shared so snapshots are cheap to clone)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl Frame {
    /// Create a new frame snapshot
    pub fn new(timestamp: i64, data: Vec<u8>, width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Size of the raw data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Top-left corner of a match in frame coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}
