//! The update cycle: poll, download, install, then record the new artifact.
//!
//! The persisted name only advances after a successful install, so a failed
//! or interrupted cycle is simply redone on the next tick.
use crate::downloader::RateLimitedDownloader;
use crate::error::UpdateError;
use crate::installer::Installer;
use crate::observer::ProgressObserver;
use crate::poller::VersionChecker;
use crate::state::ConfigStore;
use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The step a cycle was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Polling,
    Downloading,
    Installing,
    Finalizing,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Polling => "polling",
            CycleStage::Downloading => "downloading",
            CycleStage::Installing => "installing",
            CycleStage::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The endpoint points at the artifact that is already installed.
    UpToDate,
    /// A new artifact was downloaded, installed and recorded.
    Updated { artifact_name: String },
}

#[derive(Debug, thiserror::Error)]
#[error("update cycle failed while {stage}: {source}")]
pub struct CycleError {
    pub stage: CycleStage,
    #[source]
    pub source: UpdateError,
}

fn at(stage: CycleStage) -> impl FnOnce(UpdateError) -> CycleError {
    move |source| CycleError { stage, source }
}

/// Drives update cycles against one endpoint.
pub struct UpdateOrchestrator {
    store: ConfigStore,
    checker: VersionChecker,
    client: reqwest::Client,
    installer: Arc<dyn Installer>,
    observer: Arc<dyn ProgressObserver>,
}

impl UpdateOrchestrator {
    /// `client` is used for artifact downloads; the checker brings its own
    /// non-redirecting client.
    pub fn new(
        store: ConfigStore,
        checker: VersionChecker,
        client: reqwest::Client,
        installer: Arc<dyn Installer>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            store,
            checker,
            client,
            installer,
            observer,
        }
    }

    /// Runs one cycle.
    ///
    /// Settings are re-read first, so download tuning and the persisted
    /// artifact name always reflect the file on disk.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        info!(stage = %CycleStage::Polling, endpoint = %self.checker.endpoint(), "checking for a new version");
        let settings = self.store.load().await.map_err(at(CycleStage::Polling))?;
        let previous = settings
            .latest_artifact_name
            .filter(|name| !name.trim().is_empty());

        let poll = self.checker.poll(previous.as_deref()).await;
        if !poll.is_new_version {
            return Ok(CycleOutcome::UpToDate);
        }

        info!(stage = %CycleStage::Downloading, artifact = %poll.artifact_name, "fetching artifact");
        tokio::fs::create_dir_all(&settings.download_dir)
            .await
            .map_err(|e| at(CycleStage::Downloading)(e.into()))?;
        let artifact_path = settings.download_dir.join(&poll.artifact_name);

        let downloader = RateLimitedDownloader::new(self.client.clone(), settings.download)
            .map_err(at(CycleStage::Downloading))?;
        downloader
            .download(&poll.artifact_uri, &artifact_path, self.observer.as_ref())
            .await
            .map_err(at(CycleStage::Downloading))?;

        info!(stage = %CycleStage::Installing, artifact = %artifact_path.display(), "installing artifact");
        self.installer
            .install(&artifact_path)
            .await
            .map_err(at(CycleStage::Installing))?;

        info!(stage = %CycleStage::Finalizing, artifact = %poll.artifact_name, "recording installed artifact");
        if let Some(old) = previous.filter(|old| *old != poll.artifact_name) {
            remove_previous(settings.download_dir.join(old))
                .await
                .map_err(at(CycleStage::Finalizing))?;
        }
        self.store
            .persist_latest_artifact_name(&poll.artifact_name)
            .await
            .map_err(at(CycleStage::Finalizing))?;

        info!(artifact = %poll.artifact_name, "update complete");
        Ok(CycleOutcome::Updated {
            artifact_name: poll.artifact_name,
        })
    }

    /// Runs cycles until `shutdown` is cancelled, waiting `interval` after each one.
    ///
    /// A failing or panicking cycle is logged and never ends the loop. The
    /// token is only checked between cycles; a running cycle always finishes.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!(interval_secs = interval.as_secs_f64(), "updater started");

        while !shutdown.is_cancelled() {
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(stage = %e.stage, error = %e.source, "update cycle aborted"),
                Err(panic) => error!(
                    reason = panic_message(panic.as_ref()),
                    "unexpected panic during update cycle"
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("updater stopped");
    }
}

/// Deletes the previous artifact if it is still a regular file.
async fn remove_previous(path: PathBuf) -> crate::error::Result<()> {
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            warn!(path = %path.display(), "previous artifact is not a regular file, leaving it");
            return Ok(());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "previous artifact already gone");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!(path = %path.display(), "removed previous artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
