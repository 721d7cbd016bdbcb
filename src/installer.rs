//! Hands a downloaded artifact to an external installer program.
use crate::error::{Result, UpdateError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Placeholder replaced by the artifact path in installer arguments.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Installs an artifact. Only success or failure matters to the caller.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, artifact: &Path) -> Result<()>;
}

/// A helper process that has to run while the installer does, e.g. an emulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Time given to the companion to come up before installing.
    pub startup_delay_secs: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            startup_delay_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub program: String,
    /// Arguments; `{file}` is replaced by the artifact path. Without any
    /// placeholder the path is appended as the last argument.
    pub args: Vec<String>,
    pub companion: Option<CompanionConfig>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            program: "adb".to_string(),
            args: vec![
                "-s".to_string(),
                "127.0.0.1:5555".to_string(),
                "install".to_string(),
                FILE_PLACEHOLDER.to_string(),
            ],
            companion: None,
        }
    }
}

impl InstallerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(UpdateError::configuration("installer.program must be set"));
        }
        if let Some(companion) = &self.companion
            && companion.program.trim().is_empty()
        {
            return Err(UpdateError::configuration(
                "installer.companion.program must be set",
            ));
        }
        Ok(())
    }

    /// Builds the installer argument list for `artifact`.
    pub fn resolve_args(&self, artifact: &Path) -> Vec<String> {
        let path = artifact.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &path))
            .collect();

        if !self.args.iter().any(|arg| arg.contains(FILE_PLACEHOLDER)) {
            args.push(path.into_owned());
        }
        args
    }
}

/// Runs the configured program and relays its output to the log.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    config: InstallerConfig,
}

impl CommandInstaller {
    pub fn new(config: InstallerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    async fn start_companion(&self, companion: &CompanionConfig) -> Result<Child> {
        info!(program = %companion.program, "starting companion process");
        let child = Command::new(&companion.program)
            .args(&companion.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpdateError::InstallerFailed {
                program: companion.program.clone(),
                reason: format!("failed to start: {e}"),
            })?;

        tokio::time::sleep(Duration::from_secs(companion.startup_delay_secs)).await;
        Ok(child)
    }

    async fn run_installer(&self, artifact: &Path) -> Result<()> {
        let program = &self.config.program;
        let args = self.config.resolve_args(artifact);
        debug!(%program, ?args, "running installer");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpdateError::InstallerFailed {
                program: program.clone(),
                reason: format!("failed to start: {e}"),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let relay_stdout = async {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        info!(target: "installer", "{line}");
                    }
                }
            }
        };
        let relay_stderr = async {
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        warn!(target: "installer", "{line}");
                    }
                }
            }
        };

        let ((), (), status) = tokio::join!(relay_stdout, relay_stderr, child.wait());
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            Err(UpdateError::InstallerFailed {
                program: program.clone(),
                reason: format!("exited with {status}"),
            })
        }
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self, artifact: &Path) -> Result<()> {
        let companion = match &self.config.companion {
            Some(companion) => Some(self.start_companion(companion).await?),
            None => None,
        };

        info!(artifact = %artifact.display(), "installing");
        let result = self.run_installer(artifact).await;

        if let Some(mut child) = companion {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop companion process");
            }
        }

        result
    }
}
