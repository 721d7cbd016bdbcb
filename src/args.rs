use clap::Parser;
use std::path::PathBuf;

/// Keeps a locally installed artifact up to date.
///
/// Periodically asks a "latest" endpoint where the newest artifact lives,
/// downloads it under a bandwidth ceiling and hands it to an installer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the JSON configuration file (also stores the installed artifact name).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Run a single update cycle and exit with its result.
    #[arg(long)]
    pub once: bool,

    /// Override the polling interval from the configuration, e.g. "00:30:00".
    #[arg(short, long)]
    pub interval: Option<String>,

    /// Write a default configuration file at `--config` and exit.
    #[arg(long)]
    pub init: bool,
}
