//! Playbook run orchestration.
//!
//! This module owns the lifecycle of remote playbook runs: launching them in order,
//! polling each run from its own cancellable task, keeping the cross-step status
//! board consistent, and deriving the overall status and labeled progress that
//! the wizard steps gate on.

mod board;
mod job;
mod jobs;
mod poller;
mod progress;

pub use board::StatusBoard;
pub use job::JobRun;
pub use jobs::{JobOrchestrator, JobUpdate};
pub use poller::{JobEvent, PollPolicy};
pub use progress::{current_step, ProgressStep};
