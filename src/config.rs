//! Updater settings loaded from a JSON file.
//!
//! Every field has a default so a partial file is valid. The same file also
//! holds the persisted state (`latest_artifact_name`), see [`crate::state`].
use crate::downloader::DownloadConfig;
use crate::error::{Result, UpdateError};
use crate::installer::InstallerConfig;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://ak.hypergryph.com/downloads/android_lastest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Time between two update cycles, `[d.]hh:mm[:ss]`.
    pub polling_interval: String,
    /// URL answering with a redirect to the latest artifact.
    pub endpoint: String,
    /// Where artifacts are stored.
    pub download_dir: PathBuf,
    /// Directory for log files. `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    /// Connect timeout for every request and total timeout for version checks.
    pub request_timeout_secs: u64,
    pub download: DownloadConfig,
    pub installer: InstallerConfig,
    /// Name of the last successfully installed artifact.
    pub latest_artifact_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            polling_interval: "06:00:00".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            download_dir: PathBuf::from("Downloads"),
            log_dir: Some(PathBuf::from("Logs")),
            request_timeout_secs: 30,
            download: DownloadConfig::default(),
            installer: InstallerConfig::default(),
            latest_artifact_name: None,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn polling_interval(&self) -> Result<Duration> {
        utils::parse_interval(&self.polling_interval)
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint).map_err(|e| UpdateError::InvalidUrl {
            input: self.endpoint.clone(),
            reason: e.to_string(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Checks every value that would otherwise only fail in the middle of a cycle.
    pub fn validate(&self) -> Result<()> {
        self.polling_interval()?;
        self.endpoint_url()?;
        self.download.validate()?;
        self.installer.validate()?;

        if self.request_timeout_secs == 0 {
            return Err(UpdateError::configuration(
                "request_timeout_secs must be greater than zero",
            ));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(UpdateError::configuration("download_dir must not be empty"));
        }

        Ok(())
    }
}
