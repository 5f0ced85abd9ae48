use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of a remote playbook, e.g. `dayzero-os-provision`.
pub type PlaybookName = String;

/// A provisionable server record as returned by the model API.
///
/// Everything besides `id` and `name` (address, group, nic mapping, ...) is kept
/// in `attributes` untouched, so a round trip through the wizard never drops
/// fields the installer does not know about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Key shown in the transfer lists: the name when present, otherwise the id.
    pub fn display_key(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Lifecycle status of a single remote playbook run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not started",
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        }
    }
}

/// Aggregate status across the playbooks of one wizard step. Always derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Unknown,
    Running,
    Complete,
    Failed,
}

/// Variables handed to a playbook launch. Serialized under `extra-vars`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "extra-vars")]
    pub vars: BTreeMap<String, serde_json::Value>,
}

impl JobPayload {
    pub fn with_var(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn var_str(&self, key: &str) -> Option<&str> {
        self.vars.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayEventKind {
    #[serde(rename = "playbook-start")]
    Start,
    #[serde(rename = "playbook-stop")]
    Stop,
    #[serde(rename = "playbook-error")]
    Error,
}

/// Progress of a sub-playbook executed inside a launched play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayEvent {
    #[serde(rename = "event")]
    pub kind: PlayEventKind,
    pub playbook: PlaybookName,
}

impl PlayEvent {
    pub fn status(&self) -> RunStatus {
        match self.kind {
            PlayEventKind::Start => RunStatus::Running,
            PlayEventKind::Stop => RunStatus::Complete,
            PlayEventKind::Error => RunStatus::Failed,
        }
    }
}

/// One answer from the job poll collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollReport {
    pub status: RunStatus,
    #[serde(default)]
    pub raw_output: Option<String>,
    #[serde(default)]
    pub events: Vec<PlayEvent>,
}

impl PollReport {
    pub fn running() -> Self {
        Self {
            status: RunStatus::Running,
            raw_output: None,
            events: Vec::new(),
        }
    }

    pub fn finished(status: RunStatus) -> Self {
        Self {
            status,
            raw_output: None,
            events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub username: String,
}

/// Phase of the wizard step state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Editing,
    AwaitingConfirmation,
    Executing,
    Complete,
    Failed,
}

/// Button enablement and banner visibility for the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gating {
    pub phase: StepPhase,
    pub back_enabled: bool,
    pub next_enabled: bool,
    pub show_failure_banner: bool,
}

/// "Step 2 of 4" style position within a labeled progress table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPosition {
    /// Zero-based index of the first label whose playbooks are not all complete.
    /// Equals `total` once every label is done.
    pub index: usize,
    pub total: usize,
    pub label: Option<String>,
}

/// Events emitted by the wizard session and consumed by presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WizardEvent {
    StepEntered {
        index: usize,
        name: String,
    },
    Loaded {
        available: Vec<String>,
        username: Option<String>,
    },
    LoadFailed {
        reason: String,
    },
    Gating(Gating),
    ConfirmationRequested {
        message: String,
        count: usize,
    },
    JobStatus {
        playbook: PlaybookName,
        run_id: Option<String>,
        status: RunStatus,
    },
    Progress(ProgressPosition),
    Overall(OverallStatus),
    Info(InfoEvent),
    Finished,
}

/// Structured info events rendered as plain messages by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Launched { playbook: PlaybookName, run_id: String },
    PollRetrying { playbook: PlaybookName, failures: u32 },
    PollAbandoned { playbook: PlaybookName, failures: u32 },
    Rejected { reason: String },
}

impl InfoEvent {
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Launched { playbook, run_id } => {
                format!("Launched {} (run {})", playbook, run_id)
            }
            InfoEvent::PollRetrying { playbook, failures } => {
                format!(
                    "Status of {} unavailable ({} attempt(s)), retrying",
                    playbook, failures
                )
            }
            InfoEvent::PollAbandoned { playbook, failures } => {
                format!(
                    "Gave up polling {} after {} failed attempts",
                    playbook, failures
                )
            }
            InfoEvent::Rejected { reason } => format!("Not allowed: {}", reason),
        }
    }
}
