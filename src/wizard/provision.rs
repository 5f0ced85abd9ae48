//! The "select servers to provision" step: transfer lists, the OS install
//! password, and the OS install playbook with its labeled progress.

use super::container::PageSpec;
use super::step::{Proceed, StepInputs, WizardStepController};
use crate::backend::{ModelSource, PlaybookRunner};
use crate::error::{WizardError, WizardResult};
use crate::model::{
    CurrentUser, Entity, Gating, JobPayload, OverallStatus, PlaybookName, ProgressPosition,
    StepPhase,
};
use crate::orchestrator::{
    JobEvent, JobOrchestrator, JobUpdate, PollPolicy, ProgressStep, StatusBoard,
};
use crate::selection::SelectionSetState;
use crate::validation::FieldValidityLedger;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub const INSTALL_PLAYBOOK: &str = "dayzero-os-provision";
pub const PASSWORD_FIELD: &str = "os-install-password";

/// The OS install page as the installer ships it.
pub fn os_install_page() -> PageSpec {
    PageSpec {
        name: "Select servers to provision".into(),
        playbooks: vec![INSTALL_PLAYBOOK.into()],
        progress: vec![
            ProgressStep::new("Checking power status", &["bm-power-status.yml"]),
            ProgressStep::new("Deploying Cobbler", &["cobbler-deploy.yml"]),
            ProgressStep::new("Reimaging servers", &["bm-reimage.yml"]),
            ProgressStep::new("Provisioning operating system", &["dayzero-os-provision.yml"]),
        ],
        requires_confirmation: true,
    }
}

/// Result of the initial reads, tagged with the mount it was issued for.
pub struct ModelLoad {
    pub epoch: u64,
    pub entities: anyhow::Result<(Vec<Entity>, Vec<String>)>,
    pub user: anyhow::Result<CurrentUser>,
}

/// Fetch servers, then addresses in use; the current user in parallel.
pub async fn load_model(source: Arc<dyn ModelSource>, epoch: u64) -> ModelLoad {
    let entities = async {
        let entities = source.fetch_entities().await?;
        let ips = source.fetch_ips_in_use().await?;
        Ok::<_, anyhow::Error>((entities, ips))
    };
    let (entities, user) = tokio::join!(entities, source.fetch_current_user());
    ModelLoad {
        epoch,
        entities,
        user,
    }
}

/// One entry per display key. A later entity whose key is already taken is
/// left out so that every listed key maps to exactly one server.
fn key_by_display(entities: Vec<Entity>) -> BTreeMap<String, Entity> {
    let mut keyed: BTreeMap<String, Entity> = BTreeMap::new();
    for entity in entities {
        let key = entity.display_key().to_string();
        if let Some(first) = keyed.get(&key) {
            tracing::warn!(key = %key, kept = %first.id, dropped = %entity.id, "servers share a display name; keeping the first");
            continue;
        }
        keyed.insert(key, entity);
    }
    keyed
}

pub struct ProvisionStep {
    page: PageSpec,
    epoch: u64,
    loaded: bool,
    entities: BTreeMap<String, Entity>,
    ips_in_use: HashSet<String>,
    username: Option<String>,
    password: String,
    selection: SelectionSetState,
    ledger: FieldValidityLedger,
    controller: WizardStepController,
    orchestrator: JobOrchestrator,
}

impl ProvisionStep {
    pub fn new(
        page: PageSpec,
        epoch: u64,
        runner: Arc<dyn PlaybookRunner>,
        policy: PollPolicy,
        job_tx: UnboundedSender<JobEvent>,
    ) -> Self {
        let mut ledger = FieldValidityLedger::new();
        ledger.register_text(PASSWORD_FIELD);
        let controller = WizardStepController::new(page.requires_confirmation, true);
        let orchestrator = JobOrchestrator::new(
            page.playbooks.clone(),
            page.progress.clone(),
            runner,
            policy,
            job_tx,
        );
        Self {
            page,
            epoch,
            loaded: false,
            entities: BTreeMap::new(),
            ips_in_use: HashSet::new(),
            username: None,
            password: String::new(),
            selection: SelectionSetState::default(),
            ledger,
            controller,
            orchestrator,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn page(&self) -> &PageSpec {
        &self.page
    }

    /// Called once the step is current. Runs still in flight on the board are
    /// picked up instead of showing the selection form.
    pub fn mount(&mut self, board: &mut StatusBoard) -> bool {
        let resumed = self.orchestrator.resume(board) > 0;
        if resumed {
            self.controller.resume_executing();
            self.controller.observe(self.overall(board));
        }
        resumed
    }

    pub fn on_loaded(&mut self, load: ModelLoad) -> WizardResult<&[String]> {
        if load.epoch != self.epoch {
            return Err(WizardError::StaleUpdate {
                target: format!("model load #{}", load.epoch),
            });
        }
        match load.user {
            Ok(user) => self.username = Some(user.username),
            Err(e) => tracing::warn!(error = %e, "current user unavailable"),
        }
        let (entities, ips) = load.entities.map_err(WizardError::Remote)?;
        self.entities = key_by_display(entities);
        self.selection = SelectionSetState::new(self.entities.keys().cloned());
        self.ips_in_use = ips.into_iter().collect();
        self.loaded = true;
        tracing::info!(
            servers = self.entities.len(),
            ips_in_use = self.ips_in_use.len(),
            "server list loaded"
        );
        Ok(self.selection.available())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn selection(&self) -> &SelectionSetState {
        &self.selection
    }

    pub fn choose<S: AsRef<str>>(&mut self, keys: &[S]) -> WizardResult<()> {
        self.editable("change the selection")?;
        self.selection.move_to_chosen(keys);
        Ok(())
    }

    pub fn unchoose<S: AsRef<str>>(&mut self, keys: &[S]) -> WizardResult<()> {
        self.editable("change the selection")?;
        self.selection.move_to_available(keys);
        Ok(())
    }

    pub fn choose_all(&mut self) -> WizardResult<()> {
        self.editable("change the selection")?;
        self.selection.move_all_to_chosen();
        Ok(())
    }

    pub fn unchoose_all(&mut self) -> WizardResult<()> {
        self.editable("change the selection")?;
        self.selection.move_all_to_available();
        Ok(())
    }

    pub fn set_password(&mut self, value: &str) -> WizardResult<()> {
        self.editable("change the password")?;
        self.password = value.to_string();
        self.ledger.record(PASSWORD_FIELD, !value.is_empty());
        Ok(())
    }

    pub fn phase(&self) -> StepPhase {
        self.controller.phase()
    }

    pub fn overall(&self, board: &StatusBoard) -> OverallStatus {
        self.orchestrator.overall_status(board)
    }

    pub fn progress(&self, board: &StatusBoard) -> ProgressPosition {
        self.orchestrator.progress(board)
    }

    pub fn gating(&self, board: &StatusBoard) -> Gating {
        self.controller.gating(self.inputs(board))
    }

    /// Chosen servers that do not already own an address in use.
    pub fn servers_to_provision(&self) -> Vec<&Entity> {
        self.selection
            .chosen_keys()
            .iter()
            .filter_map(|key| self.entities.get(key))
            .filter(|e| {
                e.attribute_str("ip-addr")
                    .map_or(true, |ip| !self.ips_in_use.contains(ip))
            })
            .collect()
    }

    pub fn build_payload(&self) -> JobPayload {
        let nodelist = self
            .servers_to_provision()
            .iter()
            .map(|e| e.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        JobPayload::default()
            .with_var("nodelist", nodelist)
            .with_var("ardanauser_password", self.password.clone())
    }

    pub fn confirmation_message(&self) -> String {
        let n = self.selection.chosen().len();
        format!(
            "The operating system will be installed on {n} server(s). Any data on them will be lost. Continue?"
        )
    }

    pub fn request_proceed(&mut self, board: &StatusBoard) -> WizardResult<Proceed> {
        if self.controller.phase() == StepPhase::Editing && self.password.is_empty() {
            return Err(WizardError::Validation("the OS install password is required".into()));
        }
        self.controller.request_proceed(self.inputs(board))
    }

    pub fn cancel(&mut self) -> WizardResult<()> {
        self.controller.cancel()
    }

    /// Commit the form and launch the step's playbooks.
    pub async fn confirm(
        &mut self,
        board: &mut StatusBoard,
    ) -> WizardResult<Vec<(PlaybookName, String)>> {
        self.controller.begin_executing()?;
        let payload = self.build_payload();
        tracing::info!(
            nodes = payload.var_str("nodelist").unwrap_or_default(),
            "launching OS install"
        );
        let result = self.orchestrator.launch(board, &payload).await;
        self.controller.observe(self.orchestrator.overall_status(board));
        result
    }

    pub fn apply_job(&mut self, board: &mut StatusBoard, event: JobEvent) -> WizardResult<JobUpdate> {
        let update = self.orchestrator.apply(board, event)?;
        self.controller.observe(self.orchestrator.overall_status(board));
        Ok(update)
    }

    pub fn output(&self, playbook: &str) -> Option<&str> {
        self.orchestrator.output(playbook)
    }

    /// Navigation away from this step: polling stops and the playbooks are
    /// reset so the next visit starts from scratch.
    pub fn leave(&mut self, board: &mut StatusBoard) {
        self.orchestrator.reset(board);
        self.controller.restart();
    }

    fn inputs(&self, board: &StatusBoard) -> StepInputs {
        StepInputs {
            form_valid: self.ledger.is_form_valid(),
            chosen: self.selection.chosen().len(),
            overall: self.orchestrator.overall_status(board),
        }
    }

    fn editable(&self, action: &str) -> WizardResult<()> {
        if self.controller.phase() == StepPhase::Editing {
            Ok(())
        } else {
            Err(WizardError::NotAllowed(format!(
                "cannot {action} while {:?}",
                self.controller.phase()
            )))
        }
    }
}
