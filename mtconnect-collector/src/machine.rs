/*!
MACHINE COLLECTOR - Une tâche par machine collectée

FONCTIONNEMENT :
1. Client MTConnect vers `<base_url>/<device>` + canal d'événements
2. Probe (échec = tâche terminée en erreur, les autres machines continuent)
3. Streaming en tâche de fond ; le forwarder transforme `ItemChanged` en lignes
   et publie le lot sur `ItemsChanged`
4. Annulation du token → arrêt du streaming, fin du forwarder, retour des stats
*/

use crate::health::HealthTracker;
use crate::sink::{publish_json, TelemetrySink};
use crate::telemetry::RecordBuffer;
use anyhow::{Context, Result};
use mtconnect_client::{
    ClientEvent, HttpTransportConfig, MtConnectClient, StreamOptions, StreamStatsSnapshot,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MachineJob {
    pub machine_id: String,
    pub device_url: String,
    pub topic: String,
    pub options: StreamOptions,
    pub transport: HttpTransportConfig,
}

/// Bilan d'une tâche machine terminée
#[derive(Debug, Clone, PartialEq)]
pub struct MachineReport {
    pub machine_id: String,
    pub batches_published: u64,
    pub publish_failures: u64,
    pub stats: StreamStatsSnapshot,
}

pub async fn run_machine<S: TelemetrySink>(
    job: MachineJob,
    sink: S,
    health: HealthTracker,
    token: CancellationToken,
) -> Result<MachineReport> {
    info!(machine = %job.machine_id, url = %job.device_url, "starting data collection");

    let mut client = MtConnectClient::with_config(&job.device_url, job.transport.clone())
        .with_context(|| format!("invalid device url {}", job.device_url))?;
    let events = client.observers().event_channel();
    client
        .probe()
        .await
        .with_context(|| format!("probe failed for machine {}", job.machine_id))?;

    let session = client.start_streaming(job.options.clone())?;
    health.register(&job.machine_id, session.stats());

    let forwarder = tokio::spawn(forward_batches(
        events.receiver,
        RecordBuffer::new(&job.machine_id),
        sink,
        job.topic.clone(),
    ));

    token.cancelled().await;
    let client = session.stop().await?;
    health.unregister(&job.machine_id);
    let stats = client.stats().snapshot();
    // le dispatcher (et donc l'émetteur du canal) part avec le client
    drop(client);

    let (batches_published, publish_failures) = forwarder.await.context("telemetry forwarder panicked")?;
    info!(machine = %job.machine_id, batches_published, publish_failures, "data collection stopped");

    Ok(MachineReport {
        machine_id: job.machine_id,
        batches_published,
        publish_failures,
        stats,
    })
}

/// Bufferise les items modifiés et publie un lot par `ItemsChanged` ; renvoie (publiés, échecs)
pub async fn forward_batches<S: TelemetrySink>(
    mut receiver: UnboundedReceiver<ClientEvent>,
    mut buffer: RecordBuffer,
    sink: S,
    topic: String,
) -> (u64, u64) {
    let (mut published, mut failures) = (0u64, 0u64);
    debug!(session = buffer.session_id(), %topic, "telemetry forwarder started");

    while let Some(event) = receiver.recv().await {
        match event {
            ClientEvent::ProbeCompleted => {}
            ClientEvent::ItemChanged(item) => {
                buffer.record(&item);
            }
            ClientEvent::ItemsChanged => {
                let Some(batch) = buffer.take_batch() else {
                    continue;
                };
                match publish_json(&sink, &topic, &batch).await {
                    Ok(()) => {
                        published += 1;
                        debug!(%topic, rows = batch.records.len(), session_rows = buffer.row_count(), "batch published");
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(%topic, rows = batch.records.len(), error = %e, "dropping telemetry batch");
                    }
                }
            }
        }
    }

    (published, failures)
}
