use super::FrameSource;
use crate::segmentation::Preprocessor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::Array4;
use std::path::{Path, PathBuf};

/// Repeats one still image as every frame
///
/// Useful for running the matting loop without a camera attached.
pub struct StillImageSource {
    path: PathBuf,
    preprocessor: Preprocessor,
    frame: Array4<f32>,
}

impl StillImageSource {
    pub fn new<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let preprocessor = Preprocessor::new(width, height);
        let frame = Self::load(&path, &preprocessor)?;

        tracing::info!("Using still image {} as frame source", path.display());

        Ok(Self {
            path,
            preprocessor,
            frame,
        })
    }

    fn load(path: &Path, preprocessor: &Preprocessor) -> Result<Array4<f32>> {
        let image = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?
            .to_rgb8();
        Ok(preprocessor.frame_tensor(&image))
    }
}

#[async_trait(?Send)]
impl FrameSource for StillImageSource {
    async fn capture(&mut self) -> Result<Array4<f32>> {
        Ok(self.frame.clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.preprocessor.target_size()
    }

    async fn reacquire(&mut self) -> Result<()> {
        self.frame = Self::load(&self.path, &self.preprocessor)?;
        Ok(())
    }
}
