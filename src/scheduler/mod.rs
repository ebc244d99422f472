//! Cooperative scheduling of matting cycles.
//!
//! # State machine
//!
//! ```text
//!            start()                    stop() during a cycle
//!   Idle ───────────────► Running ─────────────────────────► Stopping
//!    ▲                     │   ▲                               │
//!    │ stop() between      │   │ start() (recovery)            │ cycle ends
//!    │ cycles              │   │                               ▼
//!    └─────────────────────┘   └──────── Faulted ◄── any error  Idle
//! ```
//!
//! A single [`Scheduler::run`] future owns the recurrent store and every
//! collaborator. Hosts drive it through a [`SchedulerHandle`] that only flips
//! state; it never runs a cycle itself. Because there is exactly one loop,
//! calling `start()` repeatedly cannot create a second one.
//!
//! # Suspension points
//!
//! Waiting to be started, waiting for the next display refresh, and inside a
//! cycle while capture, inference and presentation complete. The state is
//! checked after each refresh wait, so a `stop()` issued between cycles means
//! no further cycle begins, while a `stop()` issued mid-cycle lets that cycle
//! finish and release its tensors first.
//!
//! # Recovery
//!
//! `start()` from `Faulted` resumes the loop. After a capture failure the
//! frame source is reacquired and the recurrent state reset to the
//! placeholder, since the new frames need not continue the old scene. After
//! inference or render failures the state from the last completed cycle is
//! kept.

mod clock;
mod cycle;
mod stats;

pub use clock::{FrameClock, FreeRunningClock, IntervalClock};
pub use cycle::Pipeline;
pub use stats::{CycleStats, CycleTimings, PerformanceSample};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::capture::FrameSource;
use crate::config::SessionConfig;
use crate::error::PipelineError;
use crate::output::DisplaySurface;
use crate::render::ViewMode;
use crate::segmentation::RecurrentModel;
use crate::state::RecurrentStore;
use crate::tensor::TensorLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Faulted,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
            SchedulerState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// What the loop does before resuming after a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Keep the recurrent state from the last completed cycle
    Resume,
    /// Reopen the frame source and start from the placeholder state
    Reacquire,
}

struct Shared {
    state: Cell<SchedulerState>,
    in_flight: Cell<bool>,
    view_mode: Cell<ViewMode>,
    sample: Cell<Option<PerformanceSample>>,
    last_error: RefCell<Option<Rc<PipelineError>>>,
    recovery: Cell<Option<Recovery>>,
    reset_requested: Cell<bool>,
    cycles: Cell<u64>,
    wake: Notify,
    changed: Notify,
    shutdown: CancellationToken,
}

/// Host-side control of a [`Scheduler`].
///
/// Clones share the same scheduler. The handle is `!Send`: it lives on the
/// thread that polls the scheduler loop, which is what lets its shared state
/// go without locks.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Rc<Shared>,
}

impl SchedulerHandle {
    fn new(view_mode: ViewMode) -> Self {
        Self {
            shared: Rc::new(Shared {
                state: Cell::new(SchedulerState::Idle),
                in_flight: Cell::new(false),
                view_mode: Cell::new(view_mode),
                sample: Cell::new(None),
                last_error: RefCell::new(None),
                recovery: Cell::new(None),
                reset_requested: Cell::new(false),
                cycles: Cell::new(0),
                wake: Notify::new(),
                changed: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state.get()
    }

    /// Begin (or resume) scheduling cycles. Returns false when already running.
    pub fn start(&self) -> bool {
        match self.state() {
            SchedulerState::Running => false,
            SchedulerState::Stopping => {
                // the in-flight cycle simply continues into the next one
                self.transition(SchedulerState::Running);
                true
            }
            SchedulerState::Idle | SchedulerState::Faulted => {
                self.shared.last_error.replace(None);
                self.transition(SchedulerState::Running);
                self.shared.wake.notify_one();
                true
            }
        }
    }

    /// Stop scheduling. A cycle already in flight is allowed to finish.
    pub fn stop(&self) {
        match self.state() {
            SchedulerState::Running if self.shared.in_flight.get() => {
                self.transition(SchedulerState::Stopping)
            }
            SchedulerState::Running => self.go_idle(),
            SchedulerState::Idle | SchedulerState::Stopping | SchedulerState::Faulted => {}
        }
    }

    /// Takes effect on the next cycle's render step.
    pub fn set_view_mode(&self, mode: ViewMode) {
        if self.shared.view_mode.replace(mode) != mode {
            tracing::info!(%mode, "view mode changed");
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        self.shared.view_mode.get()
    }

    /// Timing of the most recent completed cycle.
    pub fn performance_sample(&self) -> Option<PerformanceSample> {
        self.shared.sample.get()
    }

    /// The failure that faulted the scheduler, until the next `start()`.
    pub fn last_error(&self) -> Option<Rc<PipelineError>> {
        self.shared.last_error.borrow().clone()
    }

    /// Completed cycles since the scheduler was created.
    pub fn completed_cycles(&self) -> u64 {
        self.shared.cycles.get()
    }

    /// Reset the recurrent state to the placeholder before the next cycle.
    pub fn request_state_reset(&self) {
        self.shared.reset_requested.set(true);
    }

    /// End the scheduler loop for good.
    pub fn shutdown(&self) {
        tracing::info!("scheduler shutdown requested");
        self.shared.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Wait until the state machine leaves its current state or shuts down.
    pub async fn state_changed(&self) {
        let changed = self.shared.changed.notified();
        tokio::select! {
            _ = changed => {}
            _ = self.shared.shutdown.cancelled() => {}
        }
    }

    fn transition(&self, next: SchedulerState) {
        let previous = self.shared.state.replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "scheduler state changed");
            self.shared.changed.notify_waiters();
        }
    }

    /// A stopped session restarts from the placeholder state, even when
    /// `start()` arrives before the loop has seen `Idle`.
    fn go_idle(&self) {
        self.shared.reset_requested.set(true);
        self.transition(SchedulerState::Idle);
    }

    async fn running(&self) {
        loop {
            if self.state() == SchedulerState::Running {
                return;
            }
            self.shared.wake.notified().await;
        }
    }

    fn begin_cycle(&self) {
        self.shared.in_flight.set(true);
    }

    fn finish_cycle(&self, outcome: Result<PerformanceSample, PipelineError>) {
        self.shared.in_flight.set(false);
        match outcome {
            Ok(sample) => {
                self.shared.sample.set(Some(sample));
                self.shared.cycles.set(self.shared.cycles.get() + 1);
                if self.state() == SchedulerState::Stopping {
                    self.go_idle();
                }
            }
            Err(err) => self.fault(err),
        }
    }

    fn fault(&self, err: PipelineError) {
        tracing::error!(
            stage = err.stage(),
            code = err.error_code(),
            "matting cycle failed: {}",
            err
        );
        let recovery = if err.implies_source_change() {
            Recovery::Reacquire
        } else {
            Recovery::Resume
        };
        self.shared.recovery.set(Some(recovery));
        self.shared.last_error.replace(Some(Rc::new(err)));
        self.transition(SchedulerState::Faulted);
    }
}

/// What the scheduler hands back when its loop ends.
pub struct Finished {
    /// Store after teardown, holding only the placeholder state
    pub store: RecurrentStore,
    pub ledger: TensorLedger,
    pub cycles: u64,
}

/// Owns the recurrent store and collaborators and runs cycles on refresh ticks.
pub struct Scheduler<S, M, D, C> {
    pipeline: Pipeline<S, M, D>,
    clock: C,
    store: RecurrentStore,
    handle: SchedulerHandle,
}

impl<S, M, D, C> Scheduler<S, M, D, C>
where
    S: FrameSource,
    M: RecurrentModel,
    D: DisplaySurface,
    C: FrameClock,
{
    pub fn new(source: S, model: M, display: D, clock: C, config: &SessionConfig) -> Self {
        let ledger = TensorLedger::new();
        let store = RecurrentStore::new(&ledger);
        Self {
            pipeline: Pipeline::new(source, model, display, ledger, config.downsample_ratio),
            clock,
            store,
            handle: SchedulerHandle::new(ViewMode::default()),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn ledger(&self) -> TensorLedger {
        self.pipeline.ledger().clone()
    }

    pub fn store(&self) -> &RecurrentStore {
        &self.store
    }

    /// Drive cycles until [`SchedulerHandle::shutdown`] is called.
    pub async fn run(mut self) -> Finished {
        let shutdown = self.handle.shared.shutdown.clone();
        tracing::info!(
            downsample_ratio = self.pipeline.downsample_ratio(),
            "scheduler loop ready"
        );

        loop {
            if self.handle.state() == SchedulerState::Idle && self.handle.shared.reset_requested.take() {
                self.store.reset();
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.handle.running() => {}
            }

            if let Some(recovery) = self.handle.shared.recovery.take() {
                if let Err(err) = self.recover(recovery).await {
                    self.handle.fault(err);
                    continue;
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.clock.next_frame() => {}
            }

            // cancellation point: stop() while waiting for the tick
            if self.handle.state() != SchedulerState::Running {
                continue;
            }
            // pending reset from stop() or request_state_reset(), even if start() followed
            if self.handle.shared.reset_requested.take() {
                self.store.reset();
            }

            self.handle.begin_cycle();
            let mode = self.handle.view_mode();
            let outcome = self.pipeline.run_cycle(&mut self.store, mode).await;
            self.handle.finish_cycle(outcome);
        }

        self.store.reset();
        let ledger = self.pipeline.ledger().clone();
        let cycles = self.handle.completed_cycles();
        tracing::info!(
            cycles,
            outstanding = ledger.outstanding(),
            "scheduler loop finished"
        );

        Finished {
            store: self.store,
            ledger,
            cycles,
        }
    }

    async fn recover(&mut self, recovery: Recovery) -> Result<(), PipelineError> {
        match recovery {
            Recovery::Resume => {
                tracing::info!("resuming with existing recurrent state");
            }
            Recovery::Reacquire => {
                tracing::info!("reacquiring frame source and resetting recurrent state");
                self.pipeline.reacquire_source().await?;
                self.store.reset();
            }
        }
        Ok(())
    }
}
