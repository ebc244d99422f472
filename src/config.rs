use anyhow::{bail, Result};

/// Values fixed for the lifetime of a matting session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Width of frames handed to the model
    pub frame_width: u32,

    /// Height of frames handed to the model
    pub frame_height: u32,

    /// Internal resolution scale for the model, in (0, 1]
    pub downsample_ratio: f32,

    /// Display refresh rate driving the cycle clock
    pub target_fps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            downsample_ratio: 0.5,
            target_fps: 30,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            bail!(
                "frame size must be non-zero, got {}x{}",
                self.frame_width,
                self.frame_height
            );
        }

        if !(self.downsample_ratio > 0.0 && self.downsample_ratio <= 1.0) {
            bail!(
                "downsample ratio must be in (0, 1], got {}",
                self.downsample_ratio
            );
        }

        if self.target_fps == 0 {
            bail!("target fps must be > 0");
        }

        Ok(())
    }
}
