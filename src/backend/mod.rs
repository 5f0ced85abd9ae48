//! Remote collaborators of the wizard: the model/ips/user reads and the
//! playbook launch + poll endpoints.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::DeployerClient;

use crate::model::{CurrentUser, Entity, JobPayload, PollReport};
use anyhow::Result;
use async_trait::async_trait;

/// Read side: entities in the input model, addresses in use, and the logged-in user.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn fetch_entities(&self) -> Result<Vec<Entity>>;
    async fn fetch_ips_in_use(&self) -> Result<Vec<String>>;
    async fn fetch_current_user(&self) -> Result<CurrentUser>;
}

/// Launch side: start a playbook and ask for the status of a run.
#[async_trait]
pub trait PlaybookRunner: Send + Sync {
    /// Returns the run identifier assigned by the remote system.
    async fn launch(&self, playbook: &str, payload: &JobPayload) -> Result<String>;
    async fn poll(&self, run_id: &str) -> Result<PollReport>;
}
