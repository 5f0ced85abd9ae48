//! A single playbook run and its forward-only lifecycle.

use crate::error::{WizardError, WizardResult};
use crate::model::{PlaybookName, RunStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub name: PlaybookName,
    pub run_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub started_utc: Option<String>,
}

impl JobRun {
    pub fn new(name: impl Into<PlaybookName>) -> Self {
        Self {
            name: name.into(),
            run_id: None,
            status: RunStatus::NotStarted,
            started_utc: None,
        }
    }

    pub fn has_run_id(&self) -> bool {
        self.run_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// The remote system acknowledged a launch: NotStarted -> Running.
    pub fn mark_launched(&mut self, run_id: String) -> WizardResult<()> {
        if self.status != RunStatus::NotStarted {
            return Err(self.illegal(RunStatus::Running));
        }
        self.run_id = Some(run_id);
        self.status = RunStatus::Running;
        self.started_utc = Some(now_utc());
        Ok(())
    }

    /// Apply a polled status. Only Running -> {Running, Complete, Failed} is accepted.
    ///
    /// Returns true when the status changed.
    pub fn resolve(&mut self, status: RunStatus) -> WizardResult<bool> {
        match (self.status, status) {
            (RunStatus::Running, RunStatus::Running) => Ok(false),
            (RunStatus::Running, RunStatus::Complete | RunStatus::Failed) => {
                self.status = status;
                Ok(true)
            }
            (current, next) if current == next && current.is_terminal() => Ok(false),
            _ => Err(self.illegal(status)),
        }
    }

    /// The explicit reset edge back to NotStarted, clearing the run identity.
    pub fn reset(&mut self) {
        self.run_id = None;
        self.status = RunStatus::NotStarted;
        self.started_utc = None;
    }

    fn illegal(&self, to: RunStatus) -> WizardError {
        WizardError::IllegalTransition {
            playbook: self.name.clone(),
            from: self.status,
            to,
        }
    }
}

fn now_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
