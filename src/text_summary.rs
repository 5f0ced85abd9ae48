//! Run report collected from wizard events, and its text rendering.

use crate::model::{OverallStatus, PlaybookName, ProgressPosition, RunStatus};
use crate::orchestrator::JobRun;
use serde::Serialize;
use std::collections::BTreeMap;

/// What the CLI saw happen during a session.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct RunReport {
    pub overall: Option<OverallStatus>,
    pub progress: Option<ProgressPosition>,
    pub servers: Vec<String>,
    pub runs: BTreeMap<PlaybookName, JobRun>,
    pub interrupted: bool,
}

impl RunReport {
    /// Mirror a status change. A missing run id keeps the last known one.
    pub fn record(&mut self, playbook: &str, run_id: Option<String>, status: RunStatus) {
        let run = self
            .runs
            .entry(playbook.to_string())
            .or_insert_with(|| JobRun::new(playbook));
        if run_id.is_some() {
            run.run_id = run_id;
        }
        run.status = status;
    }

    pub fn succeeded(&self) -> bool {
        self.overall == Some(OverallStatus::Complete)
    }
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(report: &RunReport) -> TextSummary {
    let mut lines = Vec::new();

    if !report.servers.is_empty() {
        lines.push(format!("Servers: {}", report.servers.join(", ")));
    }
    for run in report.runs.values() {
        let id = run.run_id.as_deref().unwrap_or("-");
        lines.push(format!("{}: {} (run {id})", run.name, run.status.as_str()));
    }
    if let Some(p) = report.progress.as_ref() {
        match p.label.as_deref() {
            Some(label) if p.index < p.total => {
                lines.push(format!("Stopped at step {} of {}: {label}", p.index + 1, p.total));
            }
            _ => lines.push(format!("All {} steps done", p.total)),
        }
    }
    let overall = match report.overall {
        Some(OverallStatus::Complete) => "complete",
        Some(OverallStatus::Failed) => "FAILED",
        Some(OverallStatus::Running) => "still running",
        Some(OverallStatus::Unknown) | None => "not started",
    };
    lines.push(format!("Overall: {overall}"));
    if report.interrupted {
        lines.push("Interrupted; runs still in flight will be resumed on the next start".into());
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_names_each_run_and_the_outcome() {
        let mut report = RunReport::default();
        report.servers = vec!["cmp1".into()];
        report.record("dayzero-os-provision", Some("42".into()), RunStatus::Running);
        report.record("dayzero-os-provision", None, RunStatus::Failed);
        report.overall = Some(OverallStatus::Failed);
        report.progress = Some(ProgressPosition {
            index: 2,
            total: 4,
            label: Some("Reimaging servers".into()),
        });

        let lines = build_text_summary(&report).lines;
        assert_eq!(lines[0], "Servers: cmp1");
        assert_eq!(lines[1], "dayzero-os-provision: failed (run 42)");
        assert_eq!(lines[2], "Stopped at step 3 of 4: Reimaging servers");
        assert_eq!(lines[3], "Overall: FAILED");
        assert!(!report.succeeded());
    }
}
