//! # appsync - Application synchronizer
//!
//! Entry point for the `appsync` binary.
//!
//! ## Initialization Sequence
//!
//! 1. **Tracing** - text or JSON logs, filtered by `RUST_LOG` or `--log-level`
//! 2. **Configuration** - file, then `APPSYNC_*` environment overrides, then validation
//! 3. **Store** - the in-memory object store, optionally seeded from YAML
//! 4. **Reconciler** - standard generator, deployment event publisher, routing registry
//! 5. **Controller** - watch-driven reconciliation until Ctrl+C
//!
//! ## Shutdown
//!
//! On Ctrl+C the controller is stopped, in-flight passes are abandoned and
//! final metrics are logged.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use appsync::cli::{Cli, Commands};
use appsync::{seed, telemetry};
use appsync_reconciler::{
    ChannelPublisher, Config, Controller, ControllerConfig, DeploymentEvent, ReconcilerBuilder,
};
use appsync_store::{InMemoryObjectStore, ObjectStore, TracingObjectStore};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Run {
            config,
            applications,
        } => run(config.as_deref(), applications.as_deref()).await,
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

/// Load configuration from an optional file plus environment overrides.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let base = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    let config = base
        .from_env_overlay()
        .context("Invalid APPSYNC_* environment override")?;
    config.validate().context("Configuration is invalid")?;
    Ok(config)
}

fn check_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn run(config_path: Option<&Path>, applications: Option<&Path>) -> Result<()> {
    let start_time = Instant::now();
    let config = load_config(config_path)?;

    info!(
        cluster = %config.cluster_name,
        istio = config.features.istio,
        linkerd = config.features.linkerd,
        registry = config.registry.enabled,
        "appsync starting..."
    );

    let store: Arc<dyn ObjectStore> = Arc::new(TracingObjectStore::new(InMemoryObjectStore::new()));

    if let Some(path) = applications {
        let apps = seed::load_applications(path)?;
        let created = seed::seed_store(store.as_ref(), apps).await?;
        info!(created, path = %path.display(), "Applications loaded");
    }

    let (publisher, events) = ChannelPublisher::new(config.publisher.buffer.max(1));
    let consumer = tokio::spawn(log_deployment_events(events));

    let reconciler = Arc::new(
        ReconcilerBuilder::new()
            .with_store(Arc::clone(&store))
            .with_publisher(Arc::new(publisher))
            .with_config(config.clone())
            .build()
            .context("Failed to build reconciler")?,
    );
    let metrics = Arc::clone(reconciler.metrics());

    let mut controller = Controller::new(reconciler, ControllerConfig::from(&config));
    let stopper = controller.stopper();
    let controller_handle = tokio::spawn(async move { controller.run().await });

    info!("appsync started in {:?}", start_time.elapsed());
    info!("appsync is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;

    stopper.stop();
    match controller_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Controller exited with an error"),
        Err(e) => error!(error = %e, "Controller task failed"),
    }
    consumer.abort();

    let snapshot = metrics.snapshot();
    info!(
        applications_processed = snapshot.applications_processed,
        applications_failed = snapshot.applications_failed,
        retries = snapshot.retries,
        deployments = snapshot.deployments,
        resources_generated = snapshot.resources_generated,
        commits = snapshot.commits,
        commit_duration_ms = snapshot.commit_duration_ms,
        "appsync stopped gracefully"
    );
    Ok(())
}

/// Log deployment notifications. Stands in for an external message bus.
async fn log_deployment_events(mut events: mpsc::Receiver<DeploymentEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(
                application = %event.application,
                rollout_status = %event.rollout_status,
                payload = %payload,
                "Deployment event"
            ),
            Err(e) => warn!(error = %e, "Unable to encode deployment event"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
