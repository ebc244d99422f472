mod still;
mod v4l_capture;

pub use still::StillImageSource;
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use async_trait::async_trait;
use ndarray::Array4;

/// Source of normalized frames for the matting loop
#[async_trait(?Send)]
pub trait FrameSource {
    /// Capture one frame as a `[1, height, width, 3]` tensor with values in [0, 1]
    async fn capture(&mut self) -> Result<Array4<f32>>;

    /// Get the resolution of produced frames
    fn resolution(&self) -> (u32, u32);

    /// Reopen the underlying device after a capture failure
    async fn reacquire(&mut self) -> Result<()> {
        Ok(())
    }
}
