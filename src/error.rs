//! Failures surfaced by the matting pipeline.
//!
//! Collaborators (camera, model, output device) report `anyhow` errors with
//! context attached at each I/O boundary. The pipeline classifies them by the
//! stage that failed so the scheduler can decide how to recover.

/// A failure in one stage of the capture → infer → render cycle.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("model unavailable: {0:#}")]
    ModelLoad(anyhow::Error),

    #[error("frame capture failed: {0:#}")]
    Capture(anyhow::Error),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("render failed: {0:#}")]
    Render(anyhow::Error),
}

impl PipelineError {
    /// Short name of the failing stage, for log fields.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ModelLoad(_) => "model",
            Self::Capture(_) => "capture",
            Self::Inference(_) => "inference",
            Self::Render(_) => "render",
        }
    }

    /// Stable integer code per variant.
    pub fn error_code(&self) -> u32 {
        match self {
            Self::ModelLoad(_) => 100,
            Self::Capture(_) => 200,
            Self::Inference(_) => 300,
            Self::Render(_) => 400,
        }
    }

    /// Whether restarting implies the frame source was swapped or reopened.
    pub fn implies_source_change(&self) -> bool {
        matches!(self, Self::Capture(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
