use super::FrameSource;
use crate::segmentation::Preprocessor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::Array4;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    device_index: u32,
    preprocessor: Preprocessor,
}

impl WebcamCapture {
    /// Open webcam `device_index`, producing frames at `width`x`height`.
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = Camera::new(index, requested)
            .context("Failed to open camera")?;

        camera.open_stream()
            .context("Failed to open camera stream")?;

        tracing::info!("Webcam initialized successfully");

        Ok(Self {
            camera,
            device_index,
            preprocessor: Preprocessor::new(width, height),
        })
    }
}

#[async_trait(?Send)]
impl FrameSource for WebcamCapture {
    async fn capture(&mut self) -> Result<Array4<f32>> {
        let frame = self
            .camera
            .frame()
            .context("Failed to capture frame")?;

        let decoded = frame.decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        Ok(self.preprocessor.frame_tensor(&decoded))
    }

    fn resolution(&self) -> (u32, u32) {
        self.preprocessor.target_size()
    }

    async fn reacquire(&mut self) -> Result<()> {
        tracing::info!("Reopening webcam {} stream", self.device_index);

        if let Err(err) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream cleanly: {}", err);
        }

        self.camera
            .open_stream()
            .with_context(|| format!("Failed to reopen webcam {}", self.device_index))?;

        Ok(())
    }
}
