//! Headless installation wizard.
//!
//! The core keeps form validity, the two-list server selection, and the
//! lifecycle of remote provisioning playbooks (launch, poll, aggregate, reset),
//! and gates Back/Next on them. `cli` drives the OS install step from the
//! command line; other front-ends talk to `wizard::run_session` through
//! `UiCommand`s and `WizardEvent`s.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod selection;
pub mod server_form;
pub mod text_summary;
pub mod validation;
pub mod wizard;
