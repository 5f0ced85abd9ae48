//! Scripted in-memory backend for tests.

use super::{ModelSource, PlaybookRunner};
use crate::model::{CurrentUser, Entity, JobPayload, PollReport, RunStatus};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    next_id: u64,
    run_playbooks: HashMap<String, String>,
    scripts: HashMap<String, VecDeque<Result<PollReport, String>>>,
    launches: Vec<(String, JobPayload)>,
    polls: usize,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub entities: Vec<Entity>,
    pub ips: Vec<String>,
    pub username: String,
    pub load_delay: Option<Duration>,
    pub refuse_launch: bool,
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn with_entities(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            username: "stack".into(),
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_launch: true,
            ..Self::default()
        }
    }

    /// Queue poll answers for a playbook. Once drained, polls report Running.
    pub fn script(&self, playbook: &str, answers: Vec<Result<PollReport, &str>>) {
        let mut st = self.state.lock().unwrap();
        let queue = st.scripts.entry(playbook.to_string()).or_default();
        queue.extend(answers.into_iter().map(|a| a.map_err(str::to_string)));
    }

    pub fn launches(&self) -> Vec<(String, JobPayload)> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().unwrap().polls
    }
}

#[async_trait]
impl ModelSource for FakeBackend {
    async fn fetch_entities(&self) -> Result<Vec<Entity>> {
        if let Some(d) = self.load_delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.entities.clone())
    }

    async fn fetch_ips_in_use(&self) -> Result<Vec<String>> {
        Ok(self.ips.clone())
    }

    async fn fetch_current_user(&self) -> Result<CurrentUser> {
        Ok(CurrentUser {
            username: self.username.clone(),
        })
    }
}

#[async_trait]
impl PlaybookRunner for FakeBackend {
    async fn launch(&self, playbook: &str, payload: &JobPayload) -> Result<String> {
        if self.refuse_launch {
            return Err(anyhow!("launch of {playbook} refused"));
        }
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = st.next_id.to_string();
        st.run_playbooks.insert(id.clone(), playbook.to_string());
        st.launches.push((playbook.to_string(), payload.clone()));
        Ok(id)
    }

    async fn poll(&self, run_id: &str) -> Result<PollReport> {
        let mut st = self.state.lock().unwrap();
        st.polls += 1;
        let playbook = st
            .run_playbooks
            .get(run_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown run {run_id}"))?;
        match st.scripts.get_mut(&playbook).and_then(VecDeque::pop_front) {
            Some(Ok(report)) => Ok(report),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Ok(PollReport::finished(RunStatus::Running)),
        }
    }
}
