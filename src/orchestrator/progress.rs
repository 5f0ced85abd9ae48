use crate::model::{PlaybookName, ProgressPosition, RunStatus};
use serde::{Deserialize, Serialize};

/// A labeled group of playbooks shown as one step of a progress indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub label: String,
    pub playbooks: Vec<PlaybookName>,
}

impl ProgressStep {
    pub fn new(label: &str, playbooks: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            playbooks: playbooks.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// The first step whose playbooks are not all complete.
pub fn current_step<F>(steps: &[ProgressStep], status_of: F) -> ProgressPosition
where
    F: Fn(&str) -> RunStatus,
{
    let pending = steps.iter().position(|step| {
        !step
            .playbooks
            .iter()
            .all(|p| status_of(p) == RunStatus::Complete)
    });
    match pending {
        Some(index) => ProgressPosition {
            index,
            total: steps.len(),
            label: Some(steps[index].label.clone()),
        },
        None => ProgressPosition {
            index: steps.len(),
            total: steps.len(),
            label: None,
        },
    }
}
