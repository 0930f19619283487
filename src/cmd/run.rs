//! Controller host — `finetune-controller run`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use finetune_controller::api::Resource;
use finetune_controller::controller::WorkQueue;
use finetune_controller::manifest::{self, Snapshot};
use finetune_controller::store::Client;
use finetune_controller::{Controller, ControllerOptions, InMemoryStore, logging};

use super::super::Cli;
use super::load_config;

/// How long the queue must stay idle before `--once` considers the store converged.
const SETTLE: Duration = Duration::from_millis(200);

pub struct RunArgs {
    pub manifests: PathBuf,
    pub once: bool,
    pub max_wait: Duration,
    pub max_concurrent_reconciles: Option<usize>,
}

pub async fn cmd_run(cli: &Cli, args: RunArgs) -> Result<()> {
    let config = load_config(cli, args.max_concurrent_reconciles)?;
    logging::init_from_config(&config.logging)?;
    for warning in config.validate()? {
        warn!("{}", warning);
    }

    let experiments = manifest::load_dir(&args.manifests)?;
    let store = Arc::new(InMemoryStore::new());
    for experiment in &experiments {
        match store.create(experiment).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                warn!(experiment = %experiment.key(), "Duplicate experiment in manifests, keeping the first");
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to load experiment {}", experiment.key()));
            }
        }
    }
    info!(
        experiments = experiments.len(),
        dir = %args.manifests.display(),
        "Loaded manifests"
    );

    let controller = Controller::new(Arc::clone(&store), ControllerOptions::from_config(&config));
    let queue = controller.queue();
    let shutdown = CancellationToken::new();
    let mut handle = tokio::spawn(controller.run(shutdown.clone()));

    let exited = tokio::select! {
        result = &mut handle => Some(result),
        stop = wait_for_stop(args.once, &queue, args.max_wait) => {
            stop?;
            None
        }
    };
    let result = match exited {
        Some(result) => result,
        None => {
            shutdown.cancel();
            handle.await
        }
    };
    result.context("Controller task failed")??;

    if args.once {
        let snapshot = Snapshot::capture(store.as_ref()).await?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    Ok(())
}

async fn wait_for_stop(
    once: bool,
    queue: &WorkQueue,
    max_wait: Duration,
) -> Result<()> {
    if !once {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Received Ctrl-C");
        return Ok(());
    }
    tokio::select! {
        _ = queue.wait_idle(SETTLE) => info!("All experiments converged"),
        _ = tokio::time::sleep(max_wait) => {
            warn!(max_wait = ?max_wait, "Experiments did not converge before the deadline");
        }
    }
    Ok(())
}
