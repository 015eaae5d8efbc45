#[cfg(feature = "gpu-display")]
pub mod gpu;

use color_eyre::Result;

use crate::host::OutputSize;
use crate::pipeline::RenderFrame;

#[cfg(feature = "gpu-display")]
pub use gpu::GpuRenderer;

/// Uploads a render frame to the graphics context and draws it
pub trait FrameRenderer {
    fn render(&mut self, frame: &RenderFrame, output: OutputSize) -> Result<()>;
}

/// Renderer for hosts without a graphics context
#[derive(Debug, Default)]
pub struct NullRenderer {
    frames: u64,
}

impl NullRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameRenderer for NullRenderer {
    fn render(&mut self, _frame: &RenderFrame, _output: OutputSize) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}
