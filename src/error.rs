use crate::model::{PlaybookName, RunStatus};
use thiserror::Error;

/// Errors produced by the wizard core.
///
/// `Validation` and `NotAllowed` are recovered in place by the caller,
/// `TransientPoll` by the next poll tick, and `StaleUpdate` is discarded
/// without ever reaching the operator.
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("status of {playbook} unavailable: {reason}")]
    TransientPoll {
        playbook: PlaybookName,
        reason: String,
    },

    #[error("playbook {playbook} failed")]
    JobFailure { playbook: PlaybookName },

    #[error("discarded stale update for {target}")]
    StaleUpdate { target: String },

    #[error("illegal transition for {playbook}: {from:?} -> {to:?}")]
    IllegalTransition {
        playbook: PlaybookName,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("{0}")]
    NotAllowed(String),

    #[error("remote call failed: {0}")]
    Remote(#[from] anyhow::Error),
}

impl WizardError {
    pub fn is_stale(&self) -> bool {
        matches!(self, WizardError::StaleUpdate { .. })
    }
}

pub type WizardResult<T> = std::result::Result<T, WizardError>;
