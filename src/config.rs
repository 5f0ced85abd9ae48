use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    pub base_url: String,
    /// Delay between two polls of a healthy run.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound for the backoff applied after failed polls.
    #[serde(with = "humantime_serde")]
    pub poll_backoff_max: Duration,
    /// Consecutive failed polls after which a run is declared failed.
    pub max_poll_failures: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9085".into(),
            poll_interval: Duration::from_secs(2),
            poll_backoff_max: Duration::from_secs(30),
            max_poll_failures: 15,
            request_timeout: Duration::from_secs(10),
            user_agent: format!("provision-wizard/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WizardConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// An explicit path must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("provision-wizard").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: WizardConfig =
            serde_json::from_str(r#"{"base_url":"http://deployer:9085","poll_interval":"500ms"}"#)
                .unwrap();
        assert_eq!(cfg.base_url, "http://deployer:9085");
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.max_poll_failures, 15);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = WizardConfig::load(Some(Path::new("/nonexistent/wizard.json"))).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config"));
    }
}
