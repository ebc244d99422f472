use anyhow::{ensure, Result};
use async_trait::async_trait;
use ndarray::ArrayD;

use crate::state::{RecurrentState, RECURRENT_TENSORS};
use crate::tensor::{Tensor, TensorLedger};

/// Raw outputs of one model call, in NHWC layout.
///
/// `fgr` is `[1, H, W, 3]`, `pha` is `[1, H, W, 1]`, both in [0, 1].
/// `r1o..r4o` are the next recurrent state, shaped by the network.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub fgr: ArrayD<f32>,
    pub pha: ArrayD<f32>,
    pub r1o: ArrayD<f32>,
    pub r2o: ArrayD<f32>,
    pub r3o: ArrayD<f32>,
    pub r4o: ArrayD<f32>,
}

/// Model outputs after they have been handed to the tensor ledger.
#[derive(Debug)]
pub struct InferenceOutput {
    pub fgr: Tensor,
    pub pha: Tensor,
    pub next: RecurrentState,
}

impl ModelOutput {
    /// Move every output under `ledger`'s tracking.
    pub fn track(self, ledger: &TensorLedger) -> InferenceOutput {
        InferenceOutput {
            fgr: ledger.track(self.fgr),
            pha: ledger.track(self.pha),
            next: RecurrentState::new(
                ledger.track(self.r1o),
                ledger.track(self.r2o),
                ledger.track(self.r3o),
                ledger.track(self.r4o),
            ),
        }
    }
}

impl InferenceOutput {
    /// Reject outputs the renderer or the next call could not use.
    ///
    /// Runs on tracked tensors, so a rejected output is released through the
    /// ledger like any other.
    pub fn validate(&self) -> Result<()> {
        check_nhwc("fgr", self.fgr.shape(), 3)?;
        check_nhwc("pha", self.pha.shape(), 1)?;
        ensure!(
            self.fgr.shape()[1..3] == self.pha.shape()[1..3],
            "fgr {:?} and pha {:?} disagree on spatial size",
            self.fgr.shape(),
            self.pha.shape()
        );

        for i in 0..RECURRENT_TENSORS {
            let state = self.next.get(i);
            ensure!(
                state.ndim() == 4 && state.array().len() > 0,
                "r{}o must be a non-empty rank 4 tensor, got shape {:?}",
                i + 1,
                state.shape()
            );
        }
        Ok(())
    }
}

fn check_nhwc(name: &str, shape: &[usize], channels: usize) -> Result<()> {
    ensure!(
        shape.len() == 4 && shape[0] == 1 && shape[3] == channels,
        "{name} must be [1, H, W, {channels}], got {shape:?}"
    );
    Ok(())
}

/// A recurrent matting network.
///
/// Called once per cycle with the previous call's `r1o..r4o` fed back as
/// `state`. Before the first call `state` holds rank-0 zeros which the model
/// must accept as "no prior state". `downsample_ratio` is the same on every
/// call. Calls are never overlapped.
#[async_trait(?Send)]
pub trait RecurrentModel {
    /// Run one frame (`[1, H, W, 3]`, values in [0, 1]) through the network.
    async fn infer(
        &mut self,
        frame: &Tensor,
        state: &RecurrentState,
        downsample_ratio: f32,
    ) -> Result<ModelOutput>;

    /// Name used in log fields.
    fn name(&self) -> &str {
        "recurrent-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array4, IxDyn};

    fn output(fgr: &[usize], pha: &[usize]) -> ModelOutput {
        ModelOutput {
            fgr: ArrayD::zeros(IxDyn(fgr)),
            pha: ArrayD::zeros(IxDyn(pha)),
            r1o: Array4::<f32>::zeros((1, 8, 8, 16)).into_dyn(),
            r2o: Array4::<f32>::zeros((1, 4, 4, 20)).into_dyn(),
            r3o: Array4::<f32>::zeros((1, 2, 2, 40)).into_dyn(),
            r4o: Array4::<f32>::zeros((1, 1, 1, 64)).into_dyn(),
        }
    }

    fn validate(output: ModelOutput) -> Result<()> {
        output.track(&TensorLedger::new()).validate()
    }

    #[test]
    fn accepts_well_formed_output() {
        assert!(validate(output(&[1, 16, 16, 3], &[1, 16, 16, 1])).is_ok());
    }

    #[test]
    fn rejects_shape_mismatch() {
        assert!(validate(output(&[1, 16, 16, 4], &[1, 16, 16, 1])).is_err());
        assert!(validate(output(&[1, 16, 16, 3], &[1, 8, 16, 1])).is_err());
        assert!(validate(output(&[16, 16, 3], &[1, 16, 16, 1])).is_err());

        let mut scalar_state = output(&[1, 16, 16, 3], &[1, 16, 16, 1]);
        scalar_state.r2o = ArrayD::zeros(IxDyn(&[]));
        assert!(validate(scalar_state).is_err());
    }

    #[test]
    fn rejected_output_is_still_released() {
        let ledger = TensorLedger::new();
        let tracked = output(&[1, 16, 16, 2], &[1, 16, 16, 1]).track(&ledger);
        assert!(tracked.validate().is_err());
        drop(tracked);
        assert_eq!(ledger.allocated(), 6);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn track_registers_six_tensors() {
        let ledger = TensorLedger::new();
        let tracked = output(&[1, 16, 16, 3], &[1, 16, 16, 1]).track(&ledger);
        assert_eq!(ledger.outstanding(), 6);
        assert_eq!(tracked.next.get(3).shape(), &[1, 1, 1, 64]);
    }
}
