use super::{ModelSource, PlaybookRunner};
use crate::config::WizardConfig;
use crate::model::{CurrentUser, Entity, JobPayload, PlayEvent, PollReport, RunStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const SERVERS_PATH: &str = "/api/v1/clm/model/entities/servers";
const IPS_PATH: &str = "/api/v1/ips";
const USER_PATH: &str = "/api/v1/clm/user";

/// HTTP client for the deployer service.
pub struct DeployerClient {
    http: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PlayRecord {
    #[serde(default)]
    alive: bool,
    #[serde(default)]
    code: Option<i64>,
}

impl PlayRecord {
    fn status(&self) -> RunStatus {
        match (self.alive, self.code) {
            (true, _) => RunStatus::Running,
            (false, Some(0)) => RunStatus::Complete,
            (false, Some(_)) => RunStatus::Failed,
            // Process gone but exit code not recorded yet.
            (false, None) => RunStatus::Running,
        }
    }
}

impl DeployerClient {
    pub fn new(cfg: &WizardConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        let base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base url {}", cfg.base_url))?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("cannot build url for {path}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;
        resp.json::<T>()
            .await
            .with_context(|| format!("GET {url} returned malformed JSON"))
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = self.url(path)?;
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ModelSource for DeployerClient {
    async fn fetch_entities(&self) -> Result<Vec<Entity>> {
        self.get_json(SERVERS_PATH).await
    }

    async fn fetch_ips_in_use(&self) -> Result<Vec<String>> {
        self.get_json(IPS_PATH).await
    }

    async fn fetch_current_user(&self) -> Result<CurrentUser> {
        self.get_json(USER_PATH).await
    }
}

#[async_trait]
impl PlaybookRunner for DeployerClient {
    async fn launch(&self, playbook: &str, payload: &JobPayload) -> Result<String> {
        let url = self.url(&format!("/api/v1/clm/playbooks/{playbook}"))?;
        let resp: LaunchResponse = self
            .http
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?
            .error_for_status()
            .with_context(|| format!("launching {playbook} was refused"))?
            .json()
            .await
            .context("launch response has no run id")?;
        let run_id = match resp.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(run_id)
    }

    async fn poll(&self, run_id: &str) -> Result<PollReport> {
        let record: PlayRecord = self.get_json(&format!("/api/v1/clm/plays/{run_id}")).await?;
        let events = match self
            .get_json::<Vec<PlayEvent>>(&format!("/api/v1/clm/plays/{run_id}/events"))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!(run_id, error = %e, "play events unavailable");
                Vec::new()
            }
        };
        let status = record.status();
        let raw_output = if status.is_terminal() {
            self.get_text(&format!("/api/v1/clm/plays/{run_id}/log"))
                .await
                .ok()
        } else {
            None
        };
        Ok(PollReport {
            status,
            raw_output,
            events,
        })
    }
}
