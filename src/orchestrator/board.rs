//! Cross-step playbook status, owned by the wizard container.
//!
//! Steps never hold the map itself; they go through `get`, `reset`, `record_launch`
//! and `apply_status`, which keep every JobRun on its forward-only path.

use super::job::JobRun;
use crate::error::{WizardError, WizardResult};
use crate::model::RunStatus;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusBoard {
    runs: BTreeMap<String, JobRun>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, playbook: &str) -> Option<&JobRun> {
        self.runs.get(playbook)
    }

    pub fn status(&self, playbook: &str) -> RunStatus {
        self.get(playbook)
            .map(|r| r.status)
            .unwrap_or(RunStatus::NotStarted)
    }

    pub fn runs(&self) -> impl Iterator<Item = &JobRun> {
        self.runs.values()
    }

    /// Clear run identity and status for the named playbooks.
    pub fn reset<S: AsRef<str>>(&mut self, playbooks: &[S]) {
        for name in playbooks {
            let name = name.as_ref();
            if let Some(run) = self.runs.get_mut(name) {
                if run.status != RunStatus::NotStarted {
                    tracing::debug!(playbook = name, from = ?run.status, "resetting playbook status");
                }
                run.reset();
            }
        }
    }

    pub fn record_launch(&mut self, playbook: &str, run_id: String) -> WizardResult<()> {
        self.runs
            .entry(playbook.to_string())
            .or_insert_with(|| JobRun::new(playbook))
            .mark_launched(run_id)
    }

    /// Apply a polled status for `run_id`.
    ///
    /// A report for a run id the board no longer tracks (the entry was reset or
    /// relaunched since) is a stale update and is refused without touching state.
    pub fn apply_status(
        &mut self,
        playbook: &str,
        run_id: &str,
        status: RunStatus,
    ) -> WizardResult<bool> {
        let run = self
            .runs
            .get_mut(playbook)
            .filter(|r| r.run_id.as_deref() == Some(run_id))
            .ok_or_else(|| WizardError::StaleUpdate {
                target: format!("{playbook} run {run_id}"),
            })?;
        run.resolve(status)
    }

    /// Read a board saved by `save_to`. A missing file is an empty board.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read state {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse state {}", path.display()))
    }

    /// Persist the runs still in flight. Finished runs are reset first so a
    /// later session starts them from scratch.
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        let finished: Vec<String> = self
            .runs()
            .filter(|r| r.status.is_terminal())
            .map(|r| r.name.clone())
            .collect();
        self.reset(&finished);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let out = serde_json::to_string_pretty(self)?;
        std::fs::write(path, out).with_context(|| format!("failed to write state {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_then_resolve() {
        let mut board = StatusBoard::new();
        board.record_launch("a.yml", "1".into()).unwrap();
        assert_eq!(board.status("a.yml"), RunStatus::Running);
        assert!(board.apply_status("a.yml", "1", RunStatus::Complete).unwrap());
        assert_eq!(board.status("a.yml"), RunStatus::Complete);
        assert_eq!(board.status("b.yml"), RunStatus::NotStarted);
    }

    #[test]
    fn reports_for_reset_runs_are_stale() {
        let mut board = StatusBoard::new();
        board.record_launch("a.yml", "1".into()).unwrap();
        board.reset(&["a.yml"]);
        let err = board
            .apply_status("a.yml", "1", RunStatus::Failed)
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(board.get("a.yml").unwrap().run_id, None);

        board.record_launch("a.yml", "2".into()).unwrap();
        assert!(board.apply_status("a.yml", "1", RunStatus::Failed).is_err());
        assert_eq!(board.status("a.yml"), RunStatus::Running);
    }

    #[test]
    fn reset_only_touches_named_entries() {
        let mut board = StatusBoard::new();
        board.record_launch("a.yml", "1".into()).unwrap();
        board.record_launch("b.yml", "2".into()).unwrap();
        board.reset(&["b.yml", "unknown.yml"]);
        assert_eq!(board.status("a.yml"), RunStatus::Running);
        assert_eq!(board.status("b.yml"), RunStatus::NotStarted);
        assert!(board.get("unknown.yml").is_none());
    }

    #[test]
    fn saved_board_keeps_only_runs_in_flight() {
        let path = std::env::temp_dir().join(format!("provision-wizard-board-{}.json", std::process::id()));
        let mut board = StatusBoard::new();
        board.record_launch("a.yml", "1".into()).unwrap();
        board.record_launch("b.yml", "2".into()).unwrap();
        board.apply_status("b.yml", "2", RunStatus::Failed).unwrap();
        board.save_to(&path).unwrap();

        let loaded = StatusBoard::load_from(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.status("a.yml"), RunStatus::Running);
        assert_eq!(loaded.get("a.yml").unwrap().run_id.as_deref(), Some("1"));
        assert_eq!(loaded.status("b.yml"), RunStatus::NotStarted);
        assert!(!loaded.get("b.yml").unwrap().has_run_id());
    }

    #[test]
    fn missing_state_file_is_an_empty_board() {
        let board = StatusBoard::load_from(Path::new("/nonexistent/board.json")).unwrap();
        assert_eq!(board.runs().count(), 0);
    }
}
