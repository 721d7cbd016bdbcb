//! # artifact-updater
//!
//! Keeps a locally installed artifact in sync with a remote "latest" endpoint:
//! - Version detection through a redirect, compared with the last installed name
//! - Streaming download under a bandwidth ceiling with live progress
//! - Installation through an external program
//! - Durable record of the installed artifact, advanced only after a successful install
//!
//! The binary wires these together in [`orchestrator::UpdateOrchestrator`];
//! the components are exposed for custom setups and tests.

pub mod args;
pub mod config;
pub mod copier;
pub mod downloader;
pub mod error;
pub mod installer;
pub mod logging;
pub mod observer;
pub mod orchestrator;
pub mod poller;
pub mod state;
pub mod utils;

pub use args::Args;
pub use config::Settings;
pub use downloader::{DownloadConfig, RateLimitedDownloader};
pub use error::UpdateError;
pub use orchestrator::{CycleOutcome, UpdateOrchestrator};
pub use poller::{PollResult, VersionChecker};
pub use state::ConfigStore;
