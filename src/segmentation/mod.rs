mod preprocess;
mod rvm;
pub mod types;

pub use preprocess::{nchw_to_nhwc, nhwc_to_nchw, Preprocessor};
pub use rvm::RobustVideoMatting;
pub use types::{InferenceOutput, ModelOutput, RecurrentModel};

use crate::error::PipelineError;
use std::path::Path;

/// Load the default recurrent matting model (RVM).
///
/// A model that cannot be loaded is fatal to starting the pipeline.
pub fn load_default_model<P: AsRef<Path>>(model_path: P) -> Result<RobustVideoMatting, PipelineError> {
    RobustVideoMatting::new(model_path).map_err(PipelineError::ModelLoad)
}
