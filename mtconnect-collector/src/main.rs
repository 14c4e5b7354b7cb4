/*!
MTCONNECT COLLECTOR - Point d'entrée du collecteur multi-machines

RÔLE : Bootstrap : config, logging, découverte des devices, une tâche de collecte
par machine, publication MQTT des échantillons et du health.

ARRÊT : Ctrl-C annule toutes les sessions ; chaque machine termine son cycle en cours.
ERREUR FATALE : écrite dans un fichier horodaté sous `error_log_path`, code de sortie 1.
*/

mod config;
mod error_log;
mod health;
mod machine;
mod sink;
mod state;
mod telemetry;

use crate::config::{load_config, CollectorConfig};
use crate::error_log::write_error_log;
use crate::health::HealthTracker;
use crate::machine::{run_machine, MachineJob, MachineReport};
use crate::sink::connect_mqtt;
use anyhow::{Context, Result};
use mtconnect_client::list_device_names_at;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mtconnect_collector=info,mtconnect_client=info")),
        )
        .init();

    let cfg = load_config().await;
    if let Err(e) = run(&cfg).await {
        error!(error = %format!("{:#}", e), "collector failed");
        match write_error_log(&cfg.error_log_path, &e) {
            Ok(path) => error!(path = %path.display(), "error details have been written to the log file"),
            Err(io) => error!(error = %io, dir = %cfg.error_log_path, "could not write error log file"),
        }
        std::process::exit(1);
    }
}

async fn resolve_devices(cfg: &CollectorConfig) -> Result<Vec<String>> {
    if !cfg.agent.devices.is_empty() {
        return Ok(cfg.agent.devices.clone());
    }

    info!(agent = %cfg.agent.base_url, "getting the list of devices from the agent");
    let devices = list_device_names_at(&cfg.agent.base_url)
        .await
        .with_context(|| format!("device discovery failed on {}", cfg.agent.base_url))?;
    if devices.is_empty() {
        anyhow::bail!("agent {} does not expose any named device", cfg.agent.base_url);
    }
    Ok(devices)
}

fn log_machine_end(joined: std::result::Result<Result<MachineReport>, JoinError>) {
    match joined {
        Ok(Ok(report)) => info!(
            machine = %report.machine_id,
            batches = report.batches_published,
            failures = report.publish_failures,
            cycles = report.stats.cycles,
            "machine collector finished"
        ),
        Ok(Err(e)) => error!(error = %format!("{:#}", e), "machine collector failed"),
        Err(e) => error!(error = %e, "machine collector task panicked"),
    }
}

async fn run(cfg: &CollectorConfig) -> Result<()> {
    let devices = resolve_devices(cfg).await?;
    let token = CancellationToken::new();

    let (mqtt, mqtt_loop) = connect_mqtt(&cfg.mqtt, token.clone());
    let health = HealthTracker::new();
    let health_task = health.spawn_health_publisher(
        mqtt.clone(),
        cfg.health_topic(),
        Duration::from_secs(cfg.health_interval_secs.max(1)),
        token.clone(),
    );

    let mut machines = JoinSet::new();
    for device in &devices {
        for machine_id in cfg.machine_ids(device) {
            let job = MachineJob {
                topic: cfg.samples_topic(&machine_id),
                machine_id,
                device_url: cfg.device_url(device),
                options: cfg.stream_options(),
                transport: cfg.transport_config(),
            };
            machines.spawn(run_machine(job, mqtt.clone(), health.clone(), token.clone()));
        }
    }
    info!(devices = devices.len(), machines = machines.len(), "collector running, press Ctrl-C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!(error = %e, "cannot listen for Ctrl-C, stopping");
                }
                info!("stopping all machine collectors");
                break;
            }
            joined = machines.join_next() => match joined {
                Some(joined) => log_machine_end(joined),
                None => {
                    warn!("no machine collector left running");
                    break;
                }
            },
        }
    }

    token.cancel();
    while let Some(joined) = machines.join_next().await {
        log_machine_end(joined);
    }
    health_task.await.ok();
    mqtt_loop.await.ok();
    info!("collector stopped");
    Ok(())
}
