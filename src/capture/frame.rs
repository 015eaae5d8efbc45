use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Size of one IEEE-754 single precision sample
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Geometry of a depth frame: a fixed grid of `f32` samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameFormat {
    pub const fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Single-channel depth at the given resolution
    pub const fn depth(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }

    /// Number of `f32` samples in one frame
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Bytes occupied by one frame
    pub fn byte_size(&self) -> usize {
        self.sample_count() * SAMPLE_BYTES
    }

    /// Bytes per texture row, as needed by GPU uploads
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.channels as usize * SAMPLE_BYTES
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::depth(640, 480)
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    /// 1-based publish counter; 0 means nothing was ever written
    pub sequence: u64,
    /// When the acquisition loop published the frame
    pub captured_at: Option<Instant>,
}

impl FrameMetadata {
    pub const EMPTY: Self = Self {
        sequence: 0,
        captured_at: None,
    };
}
