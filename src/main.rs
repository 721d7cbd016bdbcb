use anyhow::{Context, Result};
use artifact_updater::installer::CommandInstaller;
use artifact_updater::observer::console_channel;
use artifact_updater::{
    Args, ConfigStore, CycleOutcome, Settings, UpdateOrchestrator, VersionChecker, logging, utils,
};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const PROGRESS_CHANNEL_CAPACITY: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let store = ConfigStore::new(&args.config);

    if args.init {
        store
            .create(&Settings::default())
            .await
            .with_context(|| format!("writing {}", args.config.display()))?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let settings = store
        .load()
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    settings.validate().context("invalid configuration")?;

    let _log_guard = logging::init_logging(settings.log_dir.as_deref())?;

    let interval = match &args.interval {
        Some(raw) => utils::parse_interval(raw)?,
        None => settings.polling_interval()?,
    };

    tokio::fs::create_dir_all(&settings.download_dir)
        .await
        .with_context(|| format!("creating {}", settings.download_dir.display()))?;

    let timeout = settings.request_timeout();
    let checker = VersionChecker::new(settings.endpoint_url()?, timeout)?;
    let client = reqwest::Client::builder()
        .user_agent(concat!("artifact-updater/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(timeout)
        .build()?;
    let installer = Arc::new(CommandInstaller::new(settings.installer.clone())?);
    let (observer, progress_task) = console_channel(PROGRESS_CHANNEL_CAPACITY);

    let orchestrator = UpdateOrchestrator::new(
        store,
        checker,
        client,
        installer,
        Arc::new(observer),
    );

    info!(config = %args.config.display(), "initialised");

    if args.once {
        let outcome = orchestrator.run_cycle().await;
        drop(orchestrator);
        let _ = progress_task.await;

        return match outcome {
            Ok(CycleOutcome::UpToDate) => {
                info!("nothing to do");
                Ok(())
            }
            Ok(CycleOutcome::Updated { artifact_name }) => {
                info!(artifact = %artifact_name, "updated");
                Ok(())
            }
            Err(e) => {
                error!(stage = %e.stage, error = %e.source, "update cycle aborted");
                Err(e.into())
            }
        };
    }

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received Ctrl+C, stopping after the current cycle (press again to exit now)");
            signal_token.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    orchestrator.run(interval, cancel_token).await;
    Ok(())
}
