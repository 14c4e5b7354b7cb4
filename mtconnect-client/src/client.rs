/*!
MTCONNECT CLIENT - Machine à états + boucle de polling d'un agent

ÉTATS :
NotProbed → Idle (probe réussi) → Streaming ⇄ Resyncing → Stopped

FONCTIONNEMENT :
- `probe` : une seule fois ; en cas d'échec le client reste `NotProbed`, rien n'est exposé
- `fetch_current_snapshot` : snapshot `current` ponctuel, refusé avant le probe (sans requête HTTP)
- `start_streaming` : déplace le client dans une tâche tokio, renvoie une `StreamingSession`
- chaque tick : `current` (premier tick / après redémarrage) ou `sample?from=&count=`, puis attente
- l'attente est interrompue par le `CancellationToken` ; une requête en cours n'est jamais annulée
- redémarrage agent détecté → refetch immédiat, borné par `max_resync_attempts`

Une instance = une tâche séquentielle : requête, décodage et notifications s'enchaînent
sans verrou. Plusieurs clients (un par machine) tournent en parallèle sans rien partager.
*/

use crate::dispatch::ChangeDispatcher;
use crate::error::ClientError;
use crate::model::{Device, Topology};
use crate::probe::decode_probe;
use crate::stream::{DecodeOutcome, StreamDecoder, StreamPosition, StreamRequest};
use crate::transport::{AgentTransport, Endpoint, HttpTransport, HttpTransportConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientState {
    NotProbed,
    Idle,
    Streaming,
    Resyncing,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Attente entre deux ticks
    pub interval: Duration,
    /// `count` des requêtes `sample` : nombre max d'entrées du journal par appel
    pub record_count: u64,
    /// Refetch synchrones autorisés quand l'instanceId change pendant un même cycle
    pub max_resync_attempts: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            record_count: 100,
            max_resync_attempts: 3,
        }
    }
}

/// Compteurs lock-free, lisibles pendant le streaming via `stats()`
#[derive(Debug, Default)]
pub struct StreamStats {
    cycles: AtomicU64,
    batches: AtomicU64,
    applied_samples: AtomicU64,
    unknown_items: AtomicU64,
    malformed_responses: AtomicU64,
    transport_errors: AtomicU64,
    decode_errors: AtomicU64,
    restarts: AtomicU64,
    agent_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatsSnapshot {
    pub cycles: u64,
    pub batches: u64,
    pub applied_samples: u64,
    pub unknown_items: u64,
    pub malformed_responses: u64,
    pub transport_errors: u64,
    pub decode_errors: u64,
    pub restarts: u64,
    pub agent_errors: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            applied_samples: self.applied_samples.load(Ordering::Relaxed),
            unknown_items: self.unknown_items.load(Ordering::Relaxed),
            malformed_responses: self.malformed_responses.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            agent_errors: self.agent_errors.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &DecodeOutcome) {
        match outcome {
            DecodeOutcome::Applied(report) => {
                if report.notified {
                    self.batches.fetch_add(1, Ordering::Relaxed);
                }
                self.applied_samples.fetch_add(report.applied as u64, Ordering::Relaxed);
                self.unknown_items.fetch_add(report.unknown.len() as u64, Ordering::Relaxed);
            }
            DecodeOutcome::Malformed => {
                self.malformed_responses.fetch_add(1, Ordering::Relaxed);
            }
            DecodeOutcome::Restarted { .. } => {
                self.restarts.fetch_add(1, Ordering::Relaxed);
            }
            DecodeOutcome::AgentError { .. } => {
                self.agent_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Connects to a single agent and streams data from it
pub struct MtConnectClient<T = HttpTransport> {
    agent_uri: String,
    transport: T,
    topology: Option<Topology>,
    decoder: StreamDecoder,
    dispatcher: ChangeDispatcher,
    state: ClientState,
    stats: Arc<StreamStats>,
    /// Borne de resynchronisation hors streaming (`fetch_current_snapshot`)
    max_resync_attempts: u32,
}

impl MtConnectClient<HttpTransport> {
    /// Client HTTP vers `agent_uri` (ex: `http://agent:5000/VMC-3Axis`)
    pub fn new(agent_uri: &str) -> Result<Self, ClientError> {
        Self::with_config(agent_uri, HttpTransportConfig::default())
    }

    pub fn with_config(agent_uri: &str, config: HttpTransportConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::with_config(agent_uri, config)?;
        Ok(Self::with_transport(agent_uri, transport))
    }
}

impl<T: AgentTransport> MtConnectClient<T> {
    pub fn with_transport(agent_uri: impl Into<String>, transport: T) -> Self {
        Self {
            agent_uri: agent_uri.into(),
            transport,
            topology: None,
            decoder: StreamDecoder::new(),
            dispatcher: ChangeDispatcher::new(),
            state: ClientState::NotProbed,
            stats: Arc::new(StreamStats::default()),
            max_resync_attempts: StreamOptions::default().max_resync_attempts,
        }
    }

    pub fn with_max_resync_attempts(mut self, attempts: u32) -> Self {
        self.max_resync_attempts = attempts;
        self
    }

    pub fn max_resync_attempts(&self) -> u32 {
        self.max_resync_attempts
    }

    pub fn agent_uri(&self) -> &str {
        &self.agent_uri
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    /// Devices déclarés par l'agent (vide avant le probe)
    pub fn devices(&self) -> &[Device] {
        self.topology.as_ref().map(|t| t.devices()).unwrap_or(&[])
    }

    pub fn position(&self) -> StreamPosition {
        self.decoder.position()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Enregistrement / retrait des observateurs
    pub fn observers(&mut self) -> &mut ChangeDispatcher {
        &mut self.dispatcher
    }

    /// Gets probe response from the agent and builds the topology
    pub async fn probe(&mut self) -> Result<(), ClientError> {
        if self.topology.is_some() {
            return Err(ClientError::AlreadyProbed);
        }

        let body = self.transport.get(Endpoint::Probe, &[]).await?;
        let topology = decode_probe(&body)?;
        info!(
            agent = %self.agent_uri,
            devices = topology.devices().len(),
            data_items = topology.len(),
            "probe completed"
        );

        self.topology = Some(topology);
        self.state = ClientState::Idle;
        self.dispatcher.probe_completed();
        Ok(())
    }

    /// Gets a `current` response and updates the data items
    pub async fn fetch_current_snapshot(&mut self) -> Result<DecodeOutcome, ClientError> {
        self.ensure_probed()?;
        let outcome = self
            .poll_with(StreamRequest::Current, 0, self.max_resync_attempts)
            .await?;
        info!(agent = %self.agent_uri, "current data processed");
        Ok(outcome)
    }

    /// Un tick : `current` ou `sample` selon la position, avec resynchronisation bornée
    pub async fn poll_once(&mut self, options: &StreamOptions) -> Result<DecodeOutcome, ClientError> {
        self.ensure_probed()?;
        let request = self.decoder.position().next_request(options.record_count);
        self.poll_with(request, options.record_count, options.max_resync_attempts)
            .await
    }

    fn ensure_probed(&self) -> Result<(), ClientError> {
        match self.topology {
            Some(_) => Ok(()),
            None => Err(ClientError::NotProbed),
        }
    }

    async fn poll_with(
        &mut self,
        first: StreamRequest,
        record_count: u64,
        max_resync_attempts: u32,
    ) -> Result<DecodeOutcome, ClientError> {
        let resumed_state = self.state;
        let mut request = first;
        let mut attempts = 0u32;

        let result = loop {
            let outcome = match self.fetch_and_decode(request).await {
                Ok(outcome) => outcome,
                Err(e) => break Err(e),
            };

            match outcome {
                DecodeOutcome::Restarted { previous, current } => {
                    attempts += 1;
                    if attempts > max_resync_attempts {
                        warn!(agent = %self.agent_uri, attempts, "agent instance keeps changing, giving up this cycle");
                        break Err(ClientError::ResyncExhausted { attempts });
                    }
                    info!(agent = %self.agent_uri, previous, current, attempts, "agent restarted, resynchronizing");
                    self.state = ClientState::Resyncing;
                    request = self.decoder.position().next_request(record_count);
                }
                other => break Ok(other),
            }
        };

        self.state = resumed_state;
        result
    }

    async fn fetch_and_decode(&mut self, request: StreamRequest) -> Result<DecodeOutcome, ClientError> {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let body = match request {
            StreamRequest::Current => self.transport.get(Endpoint::Current, &[]).await,
            StreamRequest::Sample { from, count } => {
                self.transport
                    .get(Endpoint::Sample, &[("from", from), ("count", count)])
                    .await
            }
        };
        let body = body.inspect_err(|_| {
            self.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
        })?;

        let topology = self.topology.as_mut().ok_or(ClientError::NotProbed)?;
        let outcome = self
            .decoder
            .decode(&body, topology, &mut self.dispatcher)
            .inspect_err(|_| {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
            })?;

        if request == StreamRequest::Current && matches!(outcome, DecodeOutcome::Applied(_)) {
            self.decoder.position_mut().needs_snapshot = false;
        }
        self.stats.record(&outcome);
        Ok(outcome)
    }

    /// Boucle de streaming jusqu'à annulation du token
    pub async fn run_streaming(
        &mut self,
        options: &StreamOptions,
        token: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.ensure_probed()?;
        self.decoder.position_mut().needs_snapshot = true;
        self.state = ClientState::Streaming;
        info!(
            agent = %self.agent_uri,
            interval = ?options.interval,
            record_count = options.record_count,
            "streaming started"
        );

        while !token.is_cancelled() {
            match self.poll_once(options).await {
                Ok(outcome) => debug!(agent = %self.agent_uri, ?outcome, "cycle done"),
                Err(e) => warn!(agent = %self.agent_uri, error = %e, "streaming cycle failed"),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(options.interval) => {}
            }
        }

        self.state = ClientState::Stopped;
        info!(agent = %self.agent_uri, "streaming stopped");
        Ok(())
    }
}

impl<T: AgentTransport + 'static> MtConnectClient<T> {
    /// Démarre la boucle de polling dans une tâche dédiée ; le client y est déplacé
    pub fn start_streaming(self, options: StreamOptions) -> Result<StreamingSession<T>, ClientError> {
        self.ensure_probed()?;
        let token = CancellationToken::new();
        let stats = self.stats.clone();
        let agent_uri = self.agent_uri.clone();

        let task_token = token.clone();
        let mut client = self;
        let handle = tokio::spawn(async move {
            if let Err(e) = client.run_streaming(&options, &task_token).await {
                warn!(agent = %client.agent_uri, error = %e, "streaming loop ended with error");
            }
            client
        });

        Ok(StreamingSession {
            agent_uri,
            handle,
            token,
            stats,
        })
    }
}

/// Handle d'une boucle de streaming en cours
pub struct StreamingSession<T = HttpTransport> {
    agent_uri: String,
    handle: JoinHandle<MtConnectClient<T>>,
    token: CancellationToken,
    stats: Arc<StreamStats>,
}

impl<T> StreamingSession<T> {
    pub fn agent_uri(&self) -> &str {
        &self.agent_uri
    }

    /// Demande l'arrêt : le cycle en cours se termine, le suivant n'est pas lancé
    pub fn stop_streaming(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Arrête la boucle et rend le client (état `Stopped`, topologie et échantillons conservés)
    pub async fn stop(self) -> Result<MtConnectClient<T>, ClientError> {
        self.token.cancel();
        self.handle
            .await
            .map_err(|e| ClientError::TaskFailed(e.to_string()))
    }
}
