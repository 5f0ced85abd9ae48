use crate::backend::DeployerClient;
use crate::config::WizardConfig;
use crate::model::{InfoEvent, StepPhase, WizardEvent};
use crate::orchestrator::{PollPolicy, StatusBoard};
use crate::text_summary::{build_text_summary, RunReport};
use crate::wizard::{os_install_page, run_session, SessionDeps, UiCommand};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "provision-wizard",
    version,
    about = "Select servers, install their operating system and follow the provisioning playbooks"
)]
pub struct Cli {
    /// Base URL of the deployer service (overrides the config file)
    #[arg(long)]
    pub base_url: Option<String>,

    /// JSON config file (defaults to <config dir>/provision-wizard/config.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Delay between status polls of a running playbook
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,

    /// Upper bound for the backoff after failed polls
    #[arg(long)]
    pub poll_backoff_max: Option<humantime::Duration>,

    /// Consecutive failed polls before a run is declared failed
    #[arg(long)]
    pub max_poll_failures: Option<u32>,

    /// Timeout of a single request to the deployer
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Server to provision, by name (or id when unnamed). Repeatable.
    #[arg(long = "select", value_name = "SERVER")]
    pub select: Vec<String>,

    /// Provision every server in the model
    #[arg(long, conflicts_with = "select")]
    pub all: bool,

    /// Password for the OS install user
    #[arg(long, env = "PROVISION_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Do not ask before reimaging the selected servers
    #[arg(long)]
    pub yes: bool,

    /// Print a JSON report instead of the text summary
    #[arg(long)]
    pub json: bool,

    /// Keep in-flight run ids here so an interrupted run is resumed next time
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Log level for this crate (overrides RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Layer explicitly set flags over the config file.
pub fn build_config(args: &Cli) -> Result<WizardConfig> {
    let mut cfg = WizardConfig::load(args.config.as_deref())?;
    if let Some(url) = args.base_url.as_ref() {
        cfg.base_url = url.clone();
    }
    if let Some(d) = args.poll_interval {
        cfg.poll_interval = Duration::from(d);
    }
    if let Some(d) = args.poll_backoff_max {
        cfg.poll_backoff_max = Duration::from(d);
    }
    if let Some(n) = args.max_poll_failures {
        cfg.max_poll_failures = n;
    }
    if let Some(d) = args.request_timeout {
        cfg.request_timeout = Duration::from(d);
    }
    if cfg.max_poll_failures == 0 {
        bail!("max_poll_failures must be at least 1");
    }
    if cfg.poll_interval.is_zero() {
        bail!("poll_interval must be greater than zero");
    }
    Ok(cfg)
}

/// Drives the session on behalf of the operator, from the command line flags.
struct Script {
    select: Vec<String>,
    all: bool,
    password: Option<String>,
    yes: bool,
    phase: Option<StepPhase>,
    report: RunReport,
    failure: Option<String>,
    answer_tx: UnboundedSender<bool>,
}

impl Script {
    fn new(args: &Cli, answer_tx: UnboundedSender<bool>) -> Self {
        Self {
            select: args.select.clone(),
            all: args.all,
            password: args.password.clone(),
            yes: args.yes,
            phase: None,
            report: RunReport::default(),
            failure: None,
            answer_tx,
        }
    }

    fn abort(&mut self, cmd_tx: &UnboundedSender<UiCommand>, reason: String) {
        tracing::debug!(reason = reason.as_str(), "stopping session");
        self.failure.get_or_insert(reason);
        let _ = cmd_tx.send(UiCommand::Quit);
    }

    fn on_event(
        &mut self,
        ev: WizardEvent,
        cmd_tx: &UnboundedSender<UiCommand>,
        out_tx: &UnboundedSender<OutputLine>,
    ) {
        match ev {
            WizardEvent::StepEntered { name, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {name} ==")));
            }
            WizardEvent::Loaded {
                available,
                username,
            } => {
                if let Some(user) = username {
                    let _ = out_tx.send(OutputLine::Stderr(format!("Logged in as {user}")));
                }
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Available servers: {}",
                    available.join(", ")
                )));
                if self.phase == Some(StepPhase::Editing) {
                    self.fill_form(&available, cmd_tx);
                }
            }
            WizardEvent::LoadFailed { reason } => {
                self.abort(cmd_tx, format!("failed to load servers: {reason}"));
            }
            WizardEvent::Gating(g) => {
                self.phase = Some(g.phase);
                match g.phase {
                    StepPhase::Complete => {
                        let _ = cmd_tx.send(UiCommand::Next);
                    }
                    StepPhase::Failed => {
                        let _ = out_tx.send(OutputLine::Stderr(
                            "Provisioning failed. Check the playbook output, then run again to retry."
                                .into(),
                        ));
                        self.abort(cmd_tx, "provisioning failed".into());
                    }
                    _ => {}
                }
            }
            WizardEvent::ConfirmationRequested { message, .. } => {
                if self.yes {
                    self.on_answer(true, cmd_tx);
                } else {
                    spawn_prompt(out_tx, message, self.answer_tx.clone());
                }
            }
            WizardEvent::JobStatus {
                playbook,
                run_id,
                status,
            } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "{playbook}: {}",
                    status.as_str()
                )));
                self.report.record(&playbook, run_id, status);
            }
            WizardEvent::Progress(p) => {
                if let Some(label) = p.label.as_deref() {
                    let _ = out_tx.send(OutputLine::Stderr(format!(
                        "[{}/{}] {label}",
                        p.index + 1,
                        p.total
                    )));
                }
                self.report.progress = Some(p);
            }
            WizardEvent::Overall(o) => {
                self.report.overall = Some(o);
            }
            WizardEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                if let InfoEvent::Rejected { reason } = info {
                    if self.phase == Some(StepPhase::Editing) {
                        self.abort(cmd_tx, reason);
                    }
                }
            }
            WizardEvent::Finished => {}
        }
    }

    fn on_answer(&mut self, confirmed: bool, cmd_tx: &UnboundedSender<UiCommand>) {
        if confirmed {
            let _ = cmd_tx.send(UiCommand::Confirm);
        } else {
            let _ = cmd_tx.send(UiCommand::Cancel);
            self.abort(cmd_tx, "cancelled by operator".into());
        }
    }

    fn fill_form(&mut self, available: &[String], cmd_tx: &UnboundedSender<UiCommand>) {
        let chosen = if self.all {
            available.to_vec()
        } else {
            let unknown: Vec<&str> = self
                .select
                .iter()
                .filter(|s| !available.contains(*s))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return self.abort(cmd_tx, format!("unknown server(s): {}", unknown.join(", ")));
            }
            self.select.clone()
        };
        if chosen.is_empty() {
            return self.abort(cmd_tx, "no servers selected; pass --select SERVER or --all".into());
        }
        let Some(password) = self.password.clone() else {
            return self.abort(
                cmd_tx,
                "an OS install password is required (--password or PROVISION_PASSWORD)".into(),
            );
        };
        self.report.servers = chosen.clone();
        let _ = cmd_tx.send(if self.all {
            UiCommand::ChooseAll
        } else {
            UiCommand::Choose(chosen)
        });
        let _ = cmd_tx.send(UiCommand::Password(password));
        let _ = cmd_tx.send(UiCommand::Next);
    }
}

/// Ask on stderr and read the answer on a blocking thread. The answer comes
/// back on `answer_tx` so the event loop keeps serving events and Ctrl-C.
fn spawn_prompt(
    out_tx: &UnboundedSender<OutputLine>,
    message: String,
    answer_tx: UnboundedSender<bool>,
) {
    let _ = out_tx.send(OutputLine::Stderr(format!("{message} [y/N]")));
    tokio::task::spawn_blocking(move || {
        let mut line = String::new();
        let confirmed = match std::io::stdin().read_line(&mut line) {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read confirmation");
                false
            }
        };
        let _ = answer_tx.send(confirmed);
    });
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    tracing::debug!(base_url = %cfg.base_url, poll_interval = ?cfg.poll_interval, "configuration loaded");
    let client = Arc::new(DeployerClient::new(&cfg)?);
    let board = match args.state.as_deref() {
        Some(path) => StatusBoard::load_from(path)?,
        None => StatusBoard::new(),
    };

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<WizardEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let deps = SessionDeps {
        models: client.clone(),
        runner: client,
        policy: PollPolicy::from_config(&cfg),
    };
    let session = tokio::spawn(run_session(
        vec![os_install_page()],
        board,
        deps,
        evt_tx,
        cmd_rx,
    ));

    let (answer_tx, mut answer_rx) = mpsc::unbounded_channel::<bool>();
    let mut script = Script::new(&args, answer_tx);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            ev = evt_rx.recv() => match ev {
                Some(ev) => script.on_event(ev, &cmd_tx, &out_tx),
                None => break,
            },
            Some(confirmed) = answer_rx.recv() => script.on_answer(confirmed, &cmd_tx),
            _ = &mut ctrl_c, if !script.report.interrupted => {
                tracing::warn!("interrupted, stopping the session");
                script.report.interrupted = true;
                let _ = cmd_tx.send(UiCommand::Quit);
            }
        }
    }

    let mut board = session.await.context("wizard session task failed")??;
    if let Some(path) = args.state.as_deref() {
        board.save_to(path)?;
    }

    if args.json {
        let out = serde_json::to_string_pretty(&script.report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in build_text_summary(&script.report).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    if let Some(reason) = script.failure {
        bail!(reason);
    }
    if !script.report.succeeded() && !script.report.interrupted {
        bail!("provisioning did not complete");
    }
    Ok(())
}
