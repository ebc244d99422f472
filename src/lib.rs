//! Real-time background matting with a recurrent network.
//!
//! Each display refresh the [`scheduler::Scheduler`] captures a frame, runs it
//! through the model together with the four hidden-state tensors kept in the
//! [`state::RecurrentStore`], renders the result under the active
//! [`render::ViewMode`] and promotes the model's new hidden state. Every
//! tensor is a move-only [`tensor::Tensor`] counted by a
//! [`tensor::TensorLedger`], so leaks show up as a non-zero outstanding count
//! and double releases cannot be written.

pub mod capture;
pub mod config;
pub mod error;
pub mod output;
pub mod render;
pub mod scheduler;
pub mod segmentation;
pub mod state;
pub mod tensor;

pub use config::SessionConfig;
pub use error::PipelineError;
pub use render::ViewMode;
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerState};
