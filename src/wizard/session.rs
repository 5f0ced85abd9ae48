//! Wizard session loop.
//!
//! Owns the container (and with it the status board), mounts steps as the
//! operator navigates, and serializes operator commands, model loads and poll
//! results onto one task. Presentation layers talk to it through `UiCommand`
//! and receive `WizardEvent`s back.

use super::container::{PageSpec, WizardContainer};
use super::provision::{load_model, ModelLoad, ProvisionStep};
use super::step::Proceed;
use crate::backend::{ModelSource, PlaybookRunner};
use crate::error::WizardError;
use crate::model::{
    Gating, InfoEvent, OverallStatus, ProgressPosition, RunStatus, StepPhase, WizardEvent,
};
use crate::orchestrator::{JobEvent, JobUpdate, PollPolicy, StatusBoard};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

const OUTPUT_TAIL_LINES: usize = 20;

/// Commands emitted by presentation layers.
#[derive(Debug, Clone)]
pub enum UiCommand {
    Choose(Vec<String>),
    Unchoose(Vec<String>),
    ChooseAll,
    UnchooseAll,
    Password(String),
    Next,
    Back,
    Confirm,
    Cancel,
    Quit,
}

/// Collaborators a session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub models: Arc<dyn ModelSource>,
    pub runner: Arc<dyn PlaybookRunner>,
    pub policy: PollPolicy,
}

/// What the Next button resolves to in the current state.
enum NextAction {
    Confirm(String, usize),
    Launch,
    Forward,
    Reject(WizardError),
}

struct Session {
    deps: SessionDeps,
    container: WizardContainer,
    step: Option<ProvisionStep>,
    epoch: u64,
    load_handle: Option<JoinHandle<()>>,
    event_tx: UnboundedSender<WizardEvent>,
    job_tx: UnboundedSender<JobEvent>,
    load_tx: UnboundedSender<ModelLoad>,
    last_gating: Option<Gating>,
    last_overall: Option<OverallStatus>,
    last_progress: Option<ProgressPosition>,
}

impl Session {
    fn emit(&self, ev: WizardEvent) {
        let _ = self.event_tx.send(ev);
    }

    fn info(&self, info: InfoEvent) {
        self.emit(WizardEvent::Info(info));
    }

    fn reject(&self, err: WizardError) {
        tracing::debug!(error = %err, "command rejected");
        self.info(InfoEvent::Rejected {
            reason: err.to_string(),
        });
    }

    /// Mount whatever page is current, starting its reads under a fresh epoch.
    fn mount_current(&mut self) {
        self.epoch += 1;
        self.last_gating = None;
        self.last_overall = None;
        self.last_progress = None;
        let Some(page) = self.container.current_page().cloned() else {
            return;
        };
        tracing::info!(index = self.container.current_index(), page = %page.name, "entering step");
        self.emit(WizardEvent::StepEntered {
            index: self.container.current_index(),
            name: page.name.clone(),
        });
        if page.runs_playbooks() {
            let mut step = ProvisionStep::new(
                page,
                self.epoch,
                self.deps.runner.clone(),
                self.deps.policy,
                self.job_tx.clone(),
            );
            if step.mount(self.container.board_mut()) {
                self.info(InfoEvent::Message(
                    "Resuming a run that was already in progress".into(),
                ));
            }
            let models = self.deps.models.clone();
            let tx = self.load_tx.clone();
            let epoch = self.epoch;
            self.load_handle = Some(tokio::spawn(async move {
                let _ = tx.send(load_model(models, epoch).await);
            }));
            self.step = Some(step);
        } else {
            self.step = None;
        }
        self.publish();
    }

    /// Tear the current step down. Its playbooks are reset on the board.
    fn unmount(&mut self) {
        if let Some(handle) = self.load_handle.take() {
            handle.abort();
        }
        if let Some(mut step) = self.step.take() {
            step.leave(self.container.board_mut());
        }
    }

    fn gating(&self) -> Gating {
        match &self.step {
            Some(step) => step.gating(self.container.board()),
            None => Gating {
                phase: StepPhase::Editing,
                back_enabled: true,
                next_enabled: true,
                show_failure_banner: false,
            },
        }
    }

    /// Emit gating, overall status and progress when they changed.
    fn publish(&mut self) {
        let gating = self.gating();
        if self.last_gating != Some(gating) {
            self.last_gating = Some(gating);
            self.emit(WizardEvent::Gating(gating));
        }
        let Some(step) = &self.step else {
            return;
        };
        let board = self.container.board();
        let overall = step.overall(board);
        let progress = step.progress(board);
        if self.last_overall != Some(overall) {
            self.last_overall = Some(overall);
            self.emit(WizardEvent::Overall(overall));
        }
        if overall != OverallStatus::Unknown && self.last_progress.as_ref() != Some(&progress) {
            self.last_progress = Some(progress.clone());
            self.emit(WizardEvent::Progress(progress));
        }
    }

    /// Returns false once the wizard is finished.
    async fn handle(&mut self, cmd: UiCommand) -> bool {
        let outcome = match cmd {
            UiCommand::Choose(keys) => self.with_step(|s| s.choose(&keys)),
            UiCommand::Unchoose(keys) => self.with_step(|s| s.unchoose(&keys)),
            UiCommand::ChooseAll => self.with_step(|s| s.choose_all()),
            UiCommand::UnchooseAll => self.with_step(|s| s.unchoose_all()),
            UiCommand::Password(pw) => self.with_step(|s| s.set_password(&pw)),
            UiCommand::Cancel => self.with_step(|s| s.cancel()),
            UiCommand::Confirm => {
                self.launch().await;
                Ok(())
            }
            UiCommand::Next => return self.next().await,
            UiCommand::Back => {
                self.go_back();
                Ok(())
            }
            UiCommand::Quit => return false,
        };
        if let Err(e) = outcome {
            self.reject(e);
        }
        self.publish();
        true
    }

    fn with_step<F>(&mut self, f: F) -> Result<(), WizardError>
    where
        F: FnOnce(&mut ProvisionStep) -> Result<(), WizardError>,
    {
        match self.step.as_mut() {
            Some(step) => f(step),
            None => Err(WizardError::NotAllowed(
                "this step has nothing to select".into(),
            )),
        }
    }

    async fn next(&mut self) -> bool {
        let action = match self.step.as_mut() {
            None => NextAction::Forward,
            Some(step) => match step.phase() {
                StepPhase::Editing => match step.request_proceed(self.container.board()) {
                    Ok(Proceed::Confirm) => NextAction::Confirm(
                        step.confirmation_message(),
                        step.selection().chosen().len(),
                    ),
                    Ok(Proceed::Launch) => NextAction::Launch,
                    Err(e) => NextAction::Reject(e),
                },
                StepPhase::Complete => NextAction::Forward,
                phase => NextAction::Reject(WizardError::NotAllowed(format!(
                    "Next is disabled while {phase:?}"
                ))),
            },
        };
        match action {
            NextAction::Confirm(message, count) => {
                self.emit(WizardEvent::ConfirmationRequested { message, count });
            }
            NextAction::Launch => self.launch().await,
            NextAction::Forward => {
                if !self.go_forward() {
                    return false;
                }
            }
            NextAction::Reject(e) => self.reject(e),
        }
        self.publish();
        true
    }

    async fn launch(&mut self) {
        let Some(step) = self.step.as_mut() else {
            self.reject(WizardError::NotAllowed("nothing to launch".into()));
            return;
        };
        match step.confirm(self.container.board_mut()).await {
            Ok(launched) => {
                for (playbook, run_id) in launched {
                    self.info(InfoEvent::Launched {
                        playbook: playbook.clone(),
                        run_id: run_id.clone(),
                    });
                    self.emit(WizardEvent::JobStatus {
                        playbook,
                        run_id: Some(run_id),
                        status: RunStatus::Running,
                    });
                }
            }
            Err(e @ WizardError::Remote(_)) => {
                tracing::warn!(error = %e, "launch failed");
                self.info(InfoEvent::Message(format!("{e:#}")));
            }
            Err(e) => self.reject(e),
        }
        self.publish();
    }

    /// Reset the step's playbooks and advance. Returns false past the last page.
    fn go_forward(&mut self) -> bool {
        if !self.gating().next_enabled {
            self.reject(WizardError::NotAllowed("Next is disabled".into()));
            return true;
        }
        self.unmount();
        if self.container.advance() {
            self.mount_current();
            true
        } else {
            self.emit(WizardEvent::Finished);
            false
        }
    }

    fn go_back(&mut self) {
        if !self.gating().back_enabled {
            self.reject(WizardError::NotAllowed(
                "Back is disabled while playbooks are running".into(),
            ));
            return;
        }
        self.unmount();
        self.container.retreat();
        self.mount_current();
    }

    fn on_load(&mut self, load: ModelLoad) {
        let Some(step) = self.step.as_mut() else {
            tracing::debug!(epoch = load.epoch, "discarding model load; no step mounted");
            return;
        };
        match step.on_loaded(load) {
            Ok(available) => {
                let ev = WizardEvent::Loaded {
                    available: available.to_vec(),
                    username: step.username().map(str::to_string),
                };
                self.emit(ev);
            }
            Err(e) if e.is_stale() => tracing::debug!(error = %e, "discarding model load"),
            Err(e) => {
                tracing::warn!(error = %e, "loading servers failed");
                self.emit(WizardEvent::LoadFailed {
                    reason: format!("{e:#}"),
                });
            }
        }
        self.publish();
    }

    fn on_job(&mut self, ev: JobEvent) {
        let Some(step) = self.step.as_mut() else {
            tracing::debug!(playbook = ev.playbook(), "discarding job event; no step mounted");
            return;
        };
        match step.apply_job(self.container.board_mut(), ev) {
            Ok(JobUpdate::Status {
                playbook,
                run_id,
                status,
            }) => {
                let failure = (status == RunStatus::Failed).then(|| {
                    let err = WizardError::JobFailure {
                        playbook: playbook.clone(),
                    };
                    match step.output(&playbook) {
                        Some(out) => format!("{err}:\n{}", output_tail(out)),
                        None => err.to_string(),
                    }
                });
                self.emit(WizardEvent::JobStatus {
                    playbook,
                    run_id: Some(run_id),
                    status,
                });
                if let Some(msg) = failure {
                    self.info(InfoEvent::Message(msg));
                }
            }
            Ok(JobUpdate::Retrying { playbook, failures }) => {
                self.info(InfoEvent::PollRetrying { playbook, failures });
            }
            Ok(JobUpdate::Abandoned { playbook, failures }) => {
                self.info(InfoEvent::PollAbandoned {
                    playbook: playbook.clone(),
                    failures,
                });
                self.emit(WizardEvent::JobStatus {
                    playbook,
                    run_id: None,
                    status: RunStatus::Failed,
                });
            }
            Err(e) if e.is_stale() => tracing::debug!(error = %e, "discarding poll result"),
            Err(e) => {
                tracing::warn!(error = %e, "poll result rejected");
                self.info(InfoEvent::Message(e.to_string()));
            }
        }
        self.publish();
    }
}

fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}

/// Drive the wizard until the operator quits or steps past the last page.
///
/// Returns the status board so callers can report on, or persist, the runs.
pub async fn run_session(
    pages: Vec<PageSpec>,
    board: StatusBoard,
    deps: SessionDeps,
    event_tx: UnboundedSender<WizardEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<StatusBoard> {
    let (job_tx, mut job_rx) = mpsc::unbounded_channel::<JobEvent>();
    let (load_tx, mut load_rx) = mpsc::unbounded_channel::<ModelLoad>();
    let mut session = Session {
        deps,
        container: WizardContainer::new(pages).with_board(board),
        step: None,
        epoch: 0,
        load_handle: None,
        event_tx,
        job_tx,
        load_tx,
        last_gating: None,
        last_overall: None,
        last_progress: None,
    };
    session.mount_current();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if !session.handle(cmd).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            Some(load) = load_rx.recv() => session.on_load(load),
            Some(ev) = job_rx.recv() => session.on_job(ev),
        }
    }

    // Quitting stops polling but keeps run ids, so a later session can resume.
    if let Some(handle) = session.load_handle.take() {
        handle.abort();
    }
    session.step = None;
    Ok(session.container.into_board())
}
