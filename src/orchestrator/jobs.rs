//! Launch, poll and aggregate the playbooks of one wizard step.

use super::board::StatusBoard;
use super::job::JobRun;
use super::poller::{spawn_poll_task, JobEvent, PollHandle, PollPolicy};
use super::progress::{current_step, ProgressStep};
use crate::backend::PlaybookRunner;
use crate::error::{WizardError, WizardResult};
use crate::model::{JobPayload, OverallStatus, PlaybookName, ProgressPosition, RunStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// What applying a poll-task message changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Status {
        playbook: PlaybookName,
        run_id: String,
        status: RunStatus,
    },
    Retrying {
        playbook: PlaybookName,
        failures: u32,
    },
    Abandoned {
        playbook: PlaybookName,
        failures: u32,
    },
}

pub struct JobOrchestrator {
    playbooks: Vec<PlaybookName>,
    steps: Vec<ProgressStep>,
    runner: Arc<dyn PlaybookRunner>,
    policy: PollPolicy,
    event_tx: UnboundedSender<JobEvent>,
    polls: Vec<PollHandle>,
    sub_status: BTreeMap<PlaybookName, RunStatus>,
    outputs: BTreeMap<PlaybookName, String>,
    launch_failed: bool,
}

impl JobOrchestrator {
    pub fn new(
        playbooks: Vec<PlaybookName>,
        steps: Vec<ProgressStep>,
        runner: Arc<dyn PlaybookRunner>,
        policy: PollPolicy,
        event_tx: UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            playbooks,
            steps,
            runner,
            policy,
            event_tx,
            polls: Vec::new(),
            sub_status: BTreeMap::new(),
            outputs: BTreeMap::new(),
            launch_failed: false,
        }
    }

    pub fn playbooks(&self) -> &[PlaybookName] {
        &self.playbooks
    }

    /// Launch every playbook in declared order and start polling each run.
    ///
    /// A launch refused by the remote side leaves already dispatched runs
    /// polling and makes the overall status `Failed`.
    pub async fn launch(
        &mut self,
        board: &mut StatusBoard,
        payload: &JobPayload,
    ) -> WizardResult<Vec<(PlaybookName, String)>> {
        if let Some(busy) = self
            .playbooks
            .iter()
            .find(|p| board.status(p) != RunStatus::NotStarted)
        {
            return Err(WizardError::NotAllowed(format!(
                "{busy} has already been launched; reset the step to run it again"
            )));
        }
        let mut launched = Vec::with_capacity(self.playbooks.len());
        for playbook in self.playbooks.clone() {
            let run_id = match self.runner.launch(&playbook, payload).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(playbook = %playbook, error = %e, "launch refused");
                    self.launch_failed = true;
                    return Err(WizardError::Remote(
                        e.context(format!("failed to launch {playbook}")),
                    ));
                }
            };
            board.record_launch(&playbook, run_id.clone())?;
            tracing::info!(playbook = %playbook, run_id = %run_id, "playbook launched");
            self.start_polling(&playbook, run_id.clone());
            launched.push((playbook, run_id));
        }
        Ok(launched)
    }

    /// Pick up polling for runs that are still in flight on the board.
    ///
    /// Only a complete launch with something still running is picked up. When
    /// some playbooks never got a run id, or every run already finished, the
    /// step's entries are reset so it starts over from a clean slate.
    pub fn resume(&mut self, board: &mut StatusBoard) -> usize {
        let launched = self
            .playbooks
            .iter()
            .filter(|p| board.get(p).is_some_and(JobRun::has_run_id))
            .count();
        if launched == 0 {
            return 0;
        }
        let in_flight = self
            .playbooks
            .iter()
            .any(|p| board.status(p) == RunStatus::Running);
        if launched < self.playbooks.len() || !in_flight {
            tracing::warn!(
                launched,
                playbooks = self.playbooks.len(),
                in_flight,
                "not resuming an incomplete or finished launch; resetting"
            );
            board.reset(&self.playbooks);
            return 0;
        }
        let mut resumed = 0;
        for playbook in self.playbooks.clone() {
            let Some(run) = board.get(&playbook) else {
                continue;
            };
            if run.status != RunStatus::Running || !run.has_run_id() {
                continue;
            }
            let run_id = run.run_id.clone().unwrap_or_default();
            if self.polls.iter().any(|h| h.run_id == run_id) {
                continue;
            }
            tracing::info!(playbook = %playbook, run_id = %run_id, "resuming poll of in-flight run");
            self.start_polling(&playbook, run_id);
            resumed += 1;
        }
        resumed
    }

    pub fn is_polling(&self) -> bool {
        self.polls.iter().any(|h| !h.is_finished())
    }

    /// Apply a message from a poll task.
    ///
    /// Messages for runs this step no longer tracks come back as `StaleUpdate`.
    pub fn apply(&mut self, board: &mut StatusBoard, event: JobEvent) -> WizardResult<JobUpdate> {
        if !self.playbooks.iter().any(|p| p == event.playbook()) {
            return Err(WizardError::StaleUpdate {
                target: event.playbook().to_string(),
            });
        }
        match event {
            JobEvent::Polled {
                playbook,
                run_id,
                report,
            } => {
                board.apply_status(&playbook, &run_id, report.status)?;
                for ev in &report.events {
                    self.sub_status.insert(ev.playbook.clone(), ev.status());
                }
                if let Some(out) = report.raw_output {
                    self.outputs.insert(playbook.clone(), out);
                }
                if report.status.is_terminal() {
                    tracing::info!(playbook = %playbook, run_id = %run_id, status = report.status.as_str(), "run finished");
                    self.polls.retain(|h| h.run_id != run_id);
                }
                Ok(JobUpdate::Status {
                    playbook,
                    run_id,
                    status: report.status,
                })
            }
            JobEvent::Retrying {
                playbook,
                run_id,
                failures,
            } => {
                self.ensure_current(board, &playbook, &run_id)?;
                Ok(JobUpdate::Retrying { playbook, failures })
            }
            JobEvent::Abandoned {
                playbook,
                run_id,
                failures,
            } => {
                board.apply_status(&playbook, &run_id, RunStatus::Failed)?;
                self.polls.retain(|h| h.run_id != run_id);
                Ok(JobUpdate::Abandoned { playbook, failures })
            }
        }
    }

    pub fn overall_status(&self, board: &StatusBoard) -> OverallStatus {
        if self.launch_failed {
            return OverallStatus::Failed;
        }
        let runs: Vec<_> = self.playbooks.iter().map(|p| board.get(p)).collect();
        if !runs.iter().flatten().any(|r| r.has_run_id()) {
            return OverallStatus::Unknown;
        }
        let statuses: Vec<RunStatus> = runs
            .iter()
            .map(|r| r.map(|r| r.status).unwrap_or(RunStatus::NotStarted))
            .collect();
        if statuses.contains(&RunStatus::Failed) {
            OverallStatus::Failed
        } else if statuses.iter().all(|s| *s == RunStatus::Complete) {
            OverallStatus::Complete
        } else {
            OverallStatus::Running
        }
    }

    pub fn progress(&self, board: &StatusBoard) -> ProgressPosition {
        if self.overall_status(board) == OverallStatus::Complete {
            return current_step(&self.steps, |_| RunStatus::Complete);
        }
        current_step(&self.steps, |name| {
            if self.playbooks.iter().any(|p| p == name) {
                board.status(name)
            } else {
                self.sub_status
                    .get(name)
                    .copied()
                    .unwrap_or(RunStatus::NotStarted)
            }
        })
    }

    pub fn output(&self, playbook: &str) -> Option<&str> {
        self.outputs.get(playbook).map(String::as_str)
    }

    /// Stop polling and return this step's playbooks to NotStarted.
    pub fn reset(&mut self, board: &mut StatusBoard) {
        self.teardown();
        board.reset(&self.playbooks);
        self.sub_status.clear();
        self.outputs.clear();
        self.launch_failed = false;
    }

    /// Stop every poll task. Board entries are left as they are.
    pub fn teardown(&mut self) {
        for handle in self.polls.drain(..) {
            handle.stop();
        }
    }

    fn start_polling(&mut self, playbook: &str, run_id: String) {
        let handle = spawn_poll_task(
            self.runner.clone(),
            playbook.to_string(),
            run_id,
            self.policy,
            self.event_tx.clone(),
        );
        self.polls.push(handle);
    }

    fn ensure_current(&self, board: &StatusBoard, playbook: &str, run_id: &str) -> WizardResult<()> {
        match board.get(playbook) {
            Some(run) if run.run_id.as_deref() == Some(run_id) => Ok(()),
            _ => Err(WizardError::StaleUpdate {
                target: format!("{playbook} run {run_id}"),
            }),
        }
    }
}

impl Drop for JobOrchestrator {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::model::{PlayEvent, PlayEventKind, PollReport};
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(50),
            backoff_max: Duration::from_millis(400),
            max_failures: 5,
        }
    }

    fn orchestrator(
        fake: &Arc<FakeBackend>,
        playbooks: &[&str],
    ) -> (JobOrchestrator, UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orch = JobOrchestrator::new(
            playbooks.iter().map(|p| p.to_string()).collect(),
            vec![
                ProgressStep::new("first", &["a.yml"]),
                ProgressStep::new("second", &["b.yml"]),
            ],
            fake.clone(),
            policy(),
            tx,
        );
        (orch, rx)
    }

    async fn pump(orch: &mut JobOrchestrator, board: &mut StatusBoard, rx: &mut UnboundedReceiver<JobEvent>) {
        let ev = rx.recv().await.unwrap();
        let _ = orch.apply(board, ev);
    }

    #[tokio::test(start_paused = true)]
    async fn launches_in_declared_order() {
        let fake = Arc::new(FakeBackend::default());
        let (mut orch, _rx) = orchestrator(&fake, &["b.yml", "a.yml"]);
        let mut board = StatusBoard::new();
        assert_eq!(orch.overall_status(&board), OverallStatus::Unknown);

        let payload = JobPayload::default().with_var("nodelist", "s2");
        let launched = orch.launch(&mut board, &payload).await.unwrap();
        assert_eq!(launched[0].0, "b.yml");
        assert_eq!(launched[1].0, "a.yml");
        let names: Vec<String> = fake.launches().into_iter().map(|(p, _)| p).collect();
        assert_eq!(names, ["b.yml", "a.yml"]);
        assert_eq!(fake.launches()[0].1.var_str("nodelist"), Some("s2"));
        assert_eq!(orch.overall_status(&board), OverallStatus::Running);

        assert!(matches!(
            orch.launch(&mut board, &payload).await,
            Err(WizardError::NotAllowed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_wins_while_sibling_runs() {
        let fake = Arc::new(FakeBackend::default());
        fake.script("a.yml", vec![Ok(PollReport::finished(RunStatus::Failed))]);
        let (mut orch, mut rx) = orchestrator(&fake, &["a.yml", "b.yml"]);
        let mut board = StatusBoard::new();
        orch.launch(&mut board, &JobPayload::default()).await.unwrap();

        while board.status("a.yml") != RunStatus::Failed {
            pump(&mut orch, &mut board, &mut rx).await;
        }
        assert_eq!(board.status("b.yml"), RunStatus::Running);
        assert_eq!(orch.overall_status(&board), OverallStatus::Failed);
        assert!(orch.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn complete_only_when_all_complete() {
        let fake = Arc::new(FakeBackend::default());
        fake.script("a.yml", vec![Ok(PollReport::finished(RunStatus::Complete))]);
        fake.script(
            "b.yml",
            vec![
                Ok(PollReport::running()),
                Ok(PollReport::running()),
                Ok(PollReport::finished(RunStatus::Complete)),
            ],
        );
        let (mut orch, mut rx) = orchestrator(&fake, &["a.yml", "b.yml"]);
        let mut board = StatusBoard::new();
        orch.launch(&mut board, &JobPayload::default()).await.unwrap();

        while board.status("a.yml") != RunStatus::Complete {
            pump(&mut orch, &mut board, &mut rx).await;
        }
        assert_eq!(orch.overall_status(&board), OverallStatus::Running);
        assert_eq!(orch.progress(&board).label.as_deref(), Some("second"));

        while board.status("b.yml") != RunStatus::Complete {
            pump(&mut orch, &mut board, &mut rx).await;
        }
        assert_eq!(orch.overall_status(&board), OverallStatus::Complete);
        assert_eq!(orch.progress(&board).index, 2);
        assert!(!orch.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn sub_playbook_events_drive_progress() {
        let fake = Arc::new(FakeBackend::default());
        let mut report = PollReport::running();
        report.events = vec![
            PlayEvent {
                kind: PlayEventKind::Start,
                playbook: "bm-power-status.yml".into(),
            },
            PlayEvent {
                kind: PlayEventKind::Stop,
                playbook: "bm-power-status.yml".into(),
            },
        ];
        fake.script("dayzero-os-provision", vec![Ok(report)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orch = JobOrchestrator::new(
            vec!["dayzero-os-provision".into()],
            vec![
                ProgressStep::new("power", &["bm-power-status.yml"]),
                ProgressStep::new("cobbler", &["cobbler-deploy.yml"]),
            ],
            fake.clone(),
            policy(),
            tx,
        );
        let mut board = StatusBoard::new();
        orch.launch(&mut board, &JobPayload::default()).await.unwrap();
        assert_eq!(orch.progress(&board).index, 0);
        pump(&mut orch, &mut board, &mut rx).await;
        let pos = orch.progress(&board);
        assert_eq!(pos.index, 1);
        assert_eq!(pos.label.as_deref(), Some("cobbler"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_late_reports() {
        let fake = Arc::new(FakeBackend::default());
        let (mut orch, mut rx) = orchestrator(&fake, &["a.yml"]);
        let mut board = StatusBoard::new();
        orch.launch(&mut board, &JobPayload::default()).await.unwrap();
        let late = JobEvent::Polled {
            playbook: "a.yml".into(),
            run_id: board.get("a.yml").unwrap().run_id.clone().unwrap(),
            report: PollReport::finished(RunStatus::Complete),
        };

        orch.reset(&mut board);
        assert!(!orch.is_polling());
        assert_eq!(board.status("a.yml"), RunStatus::NotStarted);
        assert!(orch.apply(&mut board, late).unwrap_err().is_stale());
        assert_eq!(orch.overall_status(&board), OverallStatus::Unknown);

        tokio::time::sleep(Duration::from_secs(1)).await;
        while let Ok(ev) = rx.try_recv() {
            assert!(orch.apply(&mut board, ev).unwrap_err().is_stale());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_run_is_failed_after_threshold() {
        let fake = Arc::new(FakeBackend::default());
        fake.script("a.yml", (0..5).map(|_| Err("timeout")).collect());
        let (mut orch, mut rx) = orchestrator(&fake, &["a.yml"]);
        let mut board = StatusBoard::new();
        orch.launch(&mut board, &JobPayload::default()).await.unwrap();

        let mut last = None;
        while board.status("a.yml") == RunStatus::Running {
            let ev = rx.recv().await.unwrap();
            last = Some(orch.apply(&mut board, ev).unwrap());
        }
        assert!(matches!(last, Some(JobUpdate::Abandoned { failures: 5, .. })));
        assert_eq!(orch.overall_status(&board), OverallStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_launch_fails_the_step() {
        let fake = Arc::new(FakeBackend::refusing());
        let (mut orch, _rx) = orchestrator(&fake, &["a.yml"]);
        let mut board = StatusBoard::new();
        let err = orch.launch(&mut board, &JobPayload::default()).await.unwrap_err();
        assert!(matches!(err, WizardError::Remote(_)));
        assert_eq!(orch.overall_status(&board), OverallStatus::Failed);
        orch.reset(&mut board);
        assert_eq!(orch.overall_status(&board), OverallStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_polls_in_flight_runs_once() {
        let fake = Arc::new(FakeBackend::default());
        let mut board = StatusBoard::new();
        for pb in ["a.yml", "b.yml"] {
            let run_id = fake.launch(pb, &JobPayload::default()).await.unwrap();
            board.record_launch(pb, run_id).unwrap();
        }
        board.apply_status("b.yml", "2", RunStatus::Complete).unwrap();
        let (mut orch, _rx) = orchestrator(&fake, &["a.yml", "b.yml"]);
        assert_eq!(orch.resume(&mut board), 1);
        assert_eq!(orch.resume(&mut board), 0);
        assert!(orch.is_polling());
        assert_eq!(orch.overall_status(&board), OverallStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_launch_is_reset_instead_of_resumed() {
        let fake = Arc::new(FakeBackend::default());
        let mut board = StatusBoard::new();
        let run_id = fake.launch("a.yml", &JobPayload::default()).await.unwrap();
        board.record_launch("a.yml", run_id).unwrap();
        let (mut orch, _rx) = orchestrator(&fake, &["a.yml", "b.yml"]);

        assert_eq!(orch.resume(&mut board), 0);
        assert!(!orch.is_polling());
        assert_eq!(board.status("a.yml"), RunStatus::NotStarted);
        assert!(!board.get("a.yml").unwrap().has_run_id());
        assert_eq!(orch.overall_status(&board), OverallStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_launch_is_reset_instead_of_resumed() {
        let fake = Arc::new(FakeBackend::default());
        let mut board = StatusBoard::new();
        let run_id = fake.launch("a.yml", &JobPayload::default()).await.unwrap();
        board.record_launch("a.yml", run_id.clone()).unwrap();
        board.apply_status("a.yml", &run_id, RunStatus::Failed).unwrap();
        let (mut orch, _rx) = orchestrator(&fake, &["a.yml"]);

        assert_eq!(orch.resume(&mut board), 0);
        assert_eq!(board.status("a.yml"), RunStatus::NotStarted);
    }
}
