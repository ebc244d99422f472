//! One capture → infer → render → promote cycle.

use std::time::Instant;

use tracing::Instrument;

use crate::capture::FrameSource;
use crate::error::{PipelineError, Result};
use crate::output::DisplaySurface;
use crate::render::{self, Routed, ViewMode};
use crate::segmentation::{InferenceOutput, RecurrentModel};
use crate::state::RecurrentStore;
use crate::tensor::TensorLedger;

use super::stats::{CycleStats, CycleTimings, PerformanceSample};

/// The collaborators one cycle talks to, plus the ledger every tensor they
/// produce is tracked under.
pub struct Pipeline<S, M, D> {
    source: S,
    model: M,
    display: D,
    ledger: TensorLedger,
    downsample_ratio: f32,
    stats: CycleStats,
}

impl<S, M, D> Pipeline<S, M, D>
where
    S: FrameSource,
    M: RecurrentModel,
    D: DisplaySurface,
{
    pub fn new(source: S, model: M, display: D, ledger: TensorLedger, downsample_ratio: f32) -> Self {
        Self {
            source,
            model,
            display,
            ledger,
            downsample_ratio,
            stats: CycleStats::default(),
        }
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    pub fn downsample_ratio(&self) -> f32 {
        self.downsample_ratio
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Run one full cycle against `store`.
    ///
    /// Steps run strictly in order. On success the model's recurrent outputs
    /// become the store's current state and the previous state is released.
    /// On failure the store is left untouched and every tensor the cycle
    /// allocated has been released before the error is returned.
    pub async fn run_cycle(
        &mut self,
        store: &mut RecurrentStore,
        mode: ViewMode,
    ) -> Result<PerformanceSample> {
        let started = Instant::now();
        let mark = self.ledger.snapshot();

        let frame = self
            .source
            .capture()
            .instrument(tracing::debug_span!("capture"))
            .await
            .map_err(PipelineError::Capture)?;
        let frame = self.ledger.track(frame);
        let captured = Instant::now();

        let span = tracing::debug_span!("inference", model = self.model.name());
        let raw = self
            .model
            .infer(&frame, store.current(), self.downsample_ratio)
            .instrument(span)
            .await;
        // post-capture checkpoint: the frame is consumed whatever the outcome
        self.ledger.release(frame);
        let output = raw.map_err(PipelineError::Inference)?.track(&self.ledger);
        output.validate().map_err(PipelineError::Inference)?;
        let InferenceOutput { fgr, pha, next } = output;
        let inferred = Instant::now();

        let Routed { source, unused } = mode.route(fgr, pha, &next);
        // post-render checkpoint for outputs this mode does not show
        self.ledger.release_all(unused);
        let image = render::render(source).map_err(PipelineError::Render)?;
        self.display
            .present(&image, mode.backdrop())
            .instrument(tracing::debug_span!("present", %mode))
            .await
            .map_err(PipelineError::Render)?;
        let rendered = Instant::now();

        store.promote(next);

        let tally = self.ledger.since(mark);
        if !tally.is_balanced() {
            tracing::warn!(
                allocated = tally.allocated,
                released = tally.released,
                "cycle changed outstanding tensor count"
            );
        }

        let timings = CycleTimings {
            capture: captured - started,
            inference: inferred - captured,
            render: rendered - inferred,
            total: started.elapsed(),
        };
        self.stats.record(&timings);
        Ok(timings.sample())
    }

    /// Reopen the frame source after a capture failure.
    pub async fn reacquire_source(&mut self) -> Result<()> {
        self.source.reacquire().await.map_err(PipelineError::Capture)
    }
}
