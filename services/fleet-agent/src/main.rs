//! taskfleet Fleet Agent
//!
//! Tracks remote backend tasks as logical instances per image and keeps the
//! registries reconciled on a timer.
//!
//! ## Architecture
//!
//! - **Coordinator**: Owns the image registries and answers admission queries
//! - **Reconciler**: Rediscovers instances of every image periodically
//! - **Task facade**: Backend access (in-memory in development)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use taskfleet_agent::config::{Config, FleetFile};
use taskfleet_agent::coordinator::{FleetCoordinator, FleetParams};
use taskfleet_agent::reconciler::{Reconciler, ReconcilerConfig};
use taskfleet_tasks::InMemoryTaskFacade;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the configured level applies
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting taskfleet fleet agent");

    let fleet = FleetFile::load(&config.fleet_file)?;
    info!(
        server_uuid = %config.server_uuid,
        profile_id = %config.profile_id,
        fleet_file = %config.fleet_file.display(),
        image_count = fleet.images.len(),
        "Configuration loaded"
    );

    // Create the backend (in-memory for now), seeded with the configured task definitions
    let facade = fleet
        .images
        .iter()
        .fold(InMemoryTaskFacade::new(), |facade, image| {
            let facade = facade.with_task_definition_named(&image.task_definition, &[]);
            match &image.cluster {
                Some(cluster) => facade.with_cluster(cluster),
                None => facade,
            }
        });
    let facade = Arc::new(facade);

    let params = FleetParams {
        server_uuid: config.server_uuid.clone(),
        profile_id: config.profile_id.clone(),
        profile_instance_limit: fleet.profile_instance_limit,
    };
    let coordinator = Arc::new(FleetCoordinator::from_configs(fleet.images, facade, params)?);

    let connection = coordinator.test_connection().await;
    if !connection.success {
        warn!(message = %connection.message, "Backend connection test failed");
    }
    for problem in coordinator.check_images().await {
        warn!(image_id = %problem.image_id, problem = %problem.message, "Image misconfigured");
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = Reconciler::new(
        Arc::clone(&coordinator),
        ReconcilerConfig {
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
            ..ReconcilerConfig::default()
        },
    );
    let mut reconciler_handle = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task panicked");
            }
        }
    }

    // Signal shutdown; the reconciler finishes its current pass first
    let _ = shutdown_tx.send(true);
    if !reconciler_handle.is_finished() {
        if let Err(e) = reconciler_handle.await {
            error!(error = %e, "Reconciler task panicked");
        }
    }

    info!(
        total_instances = coordinator.total_instance_count(),
        "Fleet agent shutdown complete"
    );
    Ok(())
}
