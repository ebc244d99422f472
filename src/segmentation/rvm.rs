use super::preprocess::{nchw_to_nhwc, nhwc_to_nchw};
use super::types::{ModelOutput, RecurrentModel};
use crate::state::RecurrentState;
use crate::tensor::Tensor;
use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use ndarray::{Array1, Array4};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_SRC: &str = "src";
const INPUT_RECURRENT: [&str; 4] = ["r1i", "r2i", "r3i", "r4i"];
const INPUT_DOWNSAMPLE: &str = "downsample_ratio";
const OUTPUT_FGR: &str = "fgr";
const OUTPUT_PHA: &str = "pha";
const OUTPUT_RECURRENT: [&str; 4] = ["r1o", "r2o", "r3o", "r4o"];

/// RobustVideoMatting running under ONNX Runtime
///
/// The exported graph takes `src`, `r1i..r4i` and `downsample_ratio` and
/// returns `fgr`, `pha` and `r1o..r4o`, all NCHW. This adapter owns no
/// recurrent state: it is handed the current state each call and returns the
/// next one, converting between the pipeline's NHWC layout and NCHW.
pub struct RobustVideoMatting {
    session: Session,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// Registers CUDA with CPU fallback.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {e}"))?
            .with_execution_providers([
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| anyhow!("Failed to register execution providers: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow!("Failed to set intra-op threads: {e}"))?
            .commit_from_file(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let inputs: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
        let outputs: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        let missing_inputs = missing_names(&inputs, required_inputs());
        let missing_outputs = missing_names(&outputs, required_outputs());
        ensure!(
            missing_inputs.is_empty() && missing_outputs.is_empty(),
            "{} is not a recurrent matting export: missing inputs {:?}, missing outputs {:?}",
            path.display(),
            missing_inputs,
            missing_outputs
        );

        tracing::info!(
            inputs = session.inputs.len(),
            outputs = session.outputs.len(),
            "RVM model loaded successfully"
        );

        Ok(Self { session })
    }
}

fn required_inputs() -> impl Iterator<Item = &'static str> {
    [INPUT_SRC, INPUT_DOWNSAMPLE].into_iter().chain(INPUT_RECURRENT)
}

fn required_outputs() -> impl Iterator<Item = &'static str> {
    [OUTPUT_FGR, OUTPUT_PHA].into_iter().chain(OUTPUT_RECURRENT)
}

/// Names in `required` that `available` lacks.
fn missing_names(available: &[&str], required: impl Iterator<Item = &'static str>) -> Vec<&'static str> {
    required.filter(|name| !available.contains(name)).collect()
}

/// NCHW input for one recurrent slot. Placeholders become `[1, 1, 1, 1]` zeros.
fn recurrent_input(tensor: &Tensor) -> Result<Array4<f32>> {
    if tensor.is_placeholder() {
        return Ok(Array4::zeros((1, 1, 1, 1)));
    }
    nhwc_to_nchw(tensor.view())
}

#[async_trait(?Send)]
impl RecurrentModel for RobustVideoMatting {
    async fn infer(
        &mut self,
        frame: &Tensor,
        state: &RecurrentState,
        downsample_ratio: f32,
    ) -> Result<ModelOutput> {
        let _span = tracing::debug_span!("rvm_infer").entered();

        let src = nhwc_to_nchw(frame.view()).context("Invalid frame tensor")?;
        let [r1, r2, r3, r4] = state.tensors();
        let r1 = recurrent_input(r1)?;
        let r2 = recurrent_input(r2)?;
        let r3 = recurrent_input(r3)?;
        let r4 = recurrent_input(r4)?;
        let ratio = Array1::from_elem(1, downsample_ratio);

        let outputs = self
            .session
            .run(ort::inputs![
                INPUT_SRC => TensorRef::from_array_view(src.view())?,
                INPUT_RECURRENT[0] => TensorRef::from_array_view(r1.view())?,
                INPUT_RECURRENT[1] => TensorRef::from_array_view(r2.view())?,
                INPUT_RECURRENT[2] => TensorRef::from_array_view(r3.view())?,
                INPUT_RECURRENT[3] => TensorRef::from_array_view(r4.view())?,
                INPUT_DOWNSAMPLE => TensorRef::from_array_view(ratio.view())?
            ])
            .context("Failed to run inference")?;

        let extract = |name: &str| -> Result<ndarray::ArrayD<f32>> {
            let view = outputs
                .get(name)
                .with_context(|| format!("Model has no output {name}"))?
                .try_extract_array::<f32>()
                .with_context(|| format!("Failed to extract output {name}"))?;
            nchw_to_nhwc(view).with_context(|| format!("Unexpected layout for output {name}"))
        };

        Ok(ModelOutput {
            fgr: extract(OUTPUT_FGR)?,
            pha: extract(OUTPUT_PHA)?,
            r1o: extract(OUTPUT_RECURRENT[0])?,
            r2o: extract(OUTPUT_RECURRENT[1])?,
            r3o: extract(OUTPUT_RECURRENT[2])?,
            r4o: extract(OUTPUT_RECURRENT[3])?,
        })
    }

    fn name(&self) -> &str {
        "rvm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorLedger;

    #[test]
    fn placeholder_feeds_unit_zero_tensor() {
        let ledger = TensorLedger::new();
        let input = recurrent_input(&ledger.scalar(0.0)).unwrap();
        assert_eq!(input.shape(), &[1, 1, 1, 1]);
        assert_eq!(input[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn reports_names_a_graph_lacks() {
        let complete = ["src", "r1i", "r2i", "r3i", "r4i", "downsample_ratio"];
        assert!(missing_names(&complete, required_inputs()).is_empty());

        let old_export = ["fgr", "pha", "r1o", "r2o", "r3o"];
        assert_eq!(missing_names(&old_export, required_outputs()), vec!["r4o"]);
    }

    #[test]
    fn live_state_is_converted_to_nchw() {
        let ledger = TensorLedger::new();
        let state = ledger.track(Array4::<f32>::zeros((1, 30, 40, 16)));
        let input = recurrent_input(&state).unwrap();
        assert_eq!(input.shape(), &[1, 16, 30, 40]);
    }
}
