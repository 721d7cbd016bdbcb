//! Detects new artifact versions through a redirecting "latest" endpoint.
use crate::error::{Result, UpdateError};
use crate::utils;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode, redirect};
use std::time::Duration;
use tracing::{error, info};
use url::Url;

/// Outcome of one version check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    pub is_new_version: bool,
    /// Absolute URL of the artifact, empty when there is no new version.
    pub artifact_uri: String,
    /// File name taken from the last path segment of `artifact_uri`.
    pub artifact_name: String,
}

impl PollResult {
    pub fn no_update() -> Self {
        Self::default()
    }

    pub fn new_version(artifact_uri: Url, artifact_name: String) -> Self {
        Self {
            is_new_version: true,
            artifact_uri: artifact_uri.into(),
            artifact_name,
        }
    }
}

/// Issues a single, non-following request to the endpoint per check.
#[derive(Debug, Clone)]
pub struct VersionChecker {
    client: Client,
    endpoint: Url,
}

impl VersionChecker {
    /// Builds a checker with its own client that never follows redirects.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|source| UpdateError::Network { source })?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Checks whether the endpoint points at an artifact other than `previous`.
    ///
    /// Never fails: transport errors, unexpected statuses and unusable
    /// `Location` headers are logged and reported as "no new version".
    pub async fn poll(&self, previous: Option<&str>) -> PollResult {
        let location = match self.locate_latest().await {
            Ok(location) => location,
            Err(e) => {
                error!(endpoint = %self.endpoint, error = %e, "could not locate the latest artifact");
                return PollResult::no_update();
            }
        };

        let Some(name) = utils::artifact_name_from_url(&location) else {
            error!(%location, "redirect target has no file name");
            return PollResult::no_update();
        };

        if previous == Some(name.as_str()) {
            info!(artifact = %name, "already up to date");
            return PollResult::no_update();
        }

        info!(artifact = %name, previous = ?previous, "new version found");
        PollResult::new_version(location, name)
    }

    /// Sends the request and resolves the `Location` of a `302 Found` answer.
    async fn locate_latest(&self) -> Result<Url> {
        let response = self.client.get(self.endpoint.clone()).send().await?;

        if response.status() != StatusCode::FOUND {
            return Err(UpdateError::HttpStatus {
                status: response.status(),
                url: self.endpoint.to_string(),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| UpdateError::InvalidUrl {
                input: String::new(),
                reason: "302 response without a readable Location header".to_string(),
            })?;

        // relative targets are resolved against the endpoint
        self.endpoint
            .join(location)
            .map_err(|e| UpdateError::InvalidUrl {
                input: location.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_update_is_empty() {
        let result = PollResult::no_update();
        assert!(!result.is_new_version);
        assert!(result.artifact_uri.is_empty());
        assert!(result.artifact_name.is_empty());
    }

    #[test]
    fn new_version_keeps_uri_and_name() {
        let url = Url::parse("https://cdn.example.com/pkg/app-v2.apk").unwrap();
        let result = PollResult::new_version(url, "app-v2.apk".into());
        assert!(result.is_new_version);
        assert_eq!(result.artifact_uri, "https://cdn.example.com/pkg/app-v2.apk");
        assert_eq!(result.artifact_name, "app-v2.apk");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_soft_failure() {
        // port 9 (discard) on localhost is not expected to serve HTTP
        let endpoint = Url::parse("http://127.0.0.1:9/latest").unwrap();
        let checker = VersionChecker::new(endpoint, Duration::from_secs(2)).unwrap();

        assert_eq!(checker.poll(Some("app-v1.apk")).await, PollResult::no_update());
    }
}
