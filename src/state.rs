//! Persisted updater state.
//!
//! The only durable state is the name of the last installed artifact. It lives
//! in the settings file next to the rest of the configuration and is rewritten
//! in place, leaving every other key untouched.
use crate::config::Settings;
use crate::error::{Result, UpdateError};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const LATEST_ARTIFACT_KEY: &str = "latest_artifact_name";

/// Reads settings from, and records installed artifacts into, a JSON file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the current settings from disk.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid JSON for [`Settings`].
    pub async fn load(&self) -> Result<Settings> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        Settings::from_json(&json)
    }

    pub async fn latest_artifact_name(&self) -> Result<Option<String>> {
        Ok(self.load().await?.latest_artifact_name)
    }

    /// Writes `settings` as a new file, refusing to overwrite an existing one.
    pub async fn create(&self, settings: &Settings) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await? {
            return Err(UpdateError::configuration(format!(
                "{} already exists",
                self.path.display()
            )));
        }
        self.write_atomically(settings.to_json()?).await
    }

    /// Records `name` as the latest installed artifact.
    ///
    /// Only `latest_artifact_name` changes; other keys, including ones this
    /// crate does not know about, keep their values and order.
    pub async fn persist_latest_artifact_name(&self, name: &str) -> Result<()> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        let mut document: Value = serde_json::from_str(&json)?;

        let Some(object) = document.as_object_mut() else {
            return Err(UpdateError::configuration(format!(
                "{} does not contain a JSON object",
                self.path.display()
            )));
        };
        object.insert(LATEST_ARTIFACT_KEY.to_string(), Value::from(name));

        self.write_atomically(serde_json::to_string_pretty(&document)?)
            .await
    }

    /// Writes next to the target and renames over it, so readers never see a
    /// half written file.
    async fn write_atomically(&self, contents: String) -> Result<()> {
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
