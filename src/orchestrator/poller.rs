//! Cancellable polling task bound to one run id.

use crate::backend::PlaybookRunner;
use crate::config::WizardConfig;
use crate::error::WizardError;
use crate::model::{PlaybookName, PollReport};
use rand::Rng;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Messages from poll tasks back to the single owner of the status board.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Polled {
        playbook: PlaybookName,
        run_id: String,
        report: PollReport,
    },
    Retrying {
        playbook: PlaybookName,
        run_id: String,
        failures: u32,
    },
    Abandoned {
        playbook: PlaybookName,
        run_id: String,
        failures: u32,
    },
}

impl JobEvent {
    pub fn playbook(&self) -> &str {
        match self {
            JobEvent::Polled { playbook, .. }
            | JobEvent::Retrying { playbook, .. }
            | JobEvent::Abandoned { playbook, .. } => playbook,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff_max: Duration,
    pub max_failures: u32,
}

impl PollPolicy {
    pub fn from_config(cfg: &WizardConfig) -> Self {
        Self {
            interval: cfg.poll_interval,
            backoff_max: cfg.poll_backoff_max.max(cfg.poll_interval),
            max_failures: cfg.max_poll_failures.max(1),
        }
    }

    /// Wait before the next poll given the current run of consecutive failures.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let factor = 1u32 << failures.min(16);
        let base = self.interval.saturating_mul(factor).min(self.backoff_max);
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 10);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Owner handle of a poll task. Dropping it stops the task.
pub(crate) struct PollHandle {
    pub playbook: PlaybookName,
    pub run_id: String,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn spawn_poll_task(
    runner: Arc<dyn PlaybookRunner>,
    playbook: PlaybookName,
    run_id: String,
    policy: PollPolicy,
    event_tx: UnboundedSender<JobEvent>,
) -> PollHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel2 = cancel.clone();
    let pb = playbook.clone();
    let id = run_id.clone();
    let handle = tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            tokio::time::sleep(policy.delay_after(failures)).await;
            if cancel2.load(Ordering::Relaxed) {
                break;
            }
            match runner.poll(&id).await {
                Ok(report) => {
                    failures = 0;
                    let terminal = report.status.is_terminal();
                    let sent = event_tx.send(JobEvent::Polled {
                        playbook: pb.clone(),
                        run_id: id.clone(),
                        report,
                    });
                    if sent.is_err() || terminal {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    let err = WizardError::TransientPoll {
                        playbook: pb.clone(),
                        reason: format!("{e:#}"),
                    };
                    tracing::debug!(run_id = %id, failures, error = %err, "poll failed");
                    if failures >= policy.max_failures {
                        tracing::warn!(playbook = %pb, run_id = %id, failures, "giving up on unreachable run");
                        let _ = event_tx.send(JobEvent::Abandoned {
                            playbook: pb.clone(),
                            run_id: id.clone(),
                            failures,
                        });
                        break;
                    }
                    let sent = event_tx.send(JobEvent::Retrying {
                        playbook: pb.clone(),
                        run_id: id.clone(),
                        failures,
                    });
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });
    PollHandle {
        playbook,
        run_id,
        cancel,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::backend::PlaybookRunner;
    use crate::model::{JobPayload, RunStatus};
    use tokio::sync::mpsc;

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
            max_failures: 3,
        }
    }

    #[test]
    fn backoff_is_capped() {
        let p = policy();
        assert_eq!(p.delay_after(0), Duration::from_millis(100));
        assert!(p.delay_after(1) >= Duration::from_millis(200));
        assert!(p.delay_after(10) <= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_terminal_report() {
        let fake = Arc::new(FakeBackend::default());
        let run_id = fake.launch("a.yml", &JobPayload::default()).await.unwrap();
        fake.script(
            "a.yml",
            vec![
                Ok(PollReport::running()),
                Err("connection refused"),
                Ok(PollReport::finished(RunStatus::Complete)),
            ],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_poll_task(fake.clone(), "a.yml".into(), run_id, policy(), tx);

        let mut seen = Vec::new();
        while let Some(ev) = rx.recv().await {
            seen.push(ev);
        }
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[1], JobEvent::Retrying { failures: 1, .. }));
        assert!(matches!(
            &seen[2],
            JobEvent::Polled { report, .. } if report.status == RunStatus::Complete
        ));
        assert!(handle.is_finished());
        assert_eq!(fake.poll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_consecutive_failures() {
        let fake = Arc::new(FakeBackend::default());
        let run_id = fake.launch("a.yml", &JobPayload::default()).await.unwrap();
        fake.script("a.yml", vec![Err("down"), Err("down"), Err("down")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = spawn_poll_task(fake.clone(), "a.yml".into(), run_id, policy(), tx);

        let mut last = None;
        while let Some(ev) = rx.recv().await {
            last = Some(ev);
        }
        assert!(matches!(last, Some(JobEvent::Abandoned { failures: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_polling() {
        let fake = Arc::new(FakeBackend::default());
        let run_id = fake.launch("a.yml", &JobPayload::default()).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_poll_task(fake.clone(), "a.yml".into(), run_id, policy(), tx);

        assert!(rx.recv().await.is_some());
        drop(handle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        let polls = fake.poll_count();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.poll_count(), polls);
        assert!(rx.recv().await.is_none());
    }
}
