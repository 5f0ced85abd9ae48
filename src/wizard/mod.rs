//! Wizard steps, navigation between them, and the session loop that drives them.

mod container;
mod provision;
mod session;
mod step;

pub use container::{PageSpec, WizardContainer};
pub use provision::{
    load_model, os_install_page, ModelLoad, ProvisionStep, INSTALL_PLAYBOOK, PASSWORD_FIELD,
};
pub use session::{run_session, SessionDeps, UiCommand};
pub use step::{Proceed, StepInputs, WizardStepController};
