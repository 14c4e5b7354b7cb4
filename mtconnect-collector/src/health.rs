use crate::sink::{publish_json, TelemetrySink};
use crate::state::{new_state, Shared};
use mtconnect_client::{StreamStats, StreamStatsSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CollectorHealth {
    pub uptime_seconds: u64,
    pub machines_streaming: u32,
    pub memory_usage_mb: f32,
    pub machines: BTreeMap<String, StreamStatsSnapshot>,
}

/// Suivi des sessions de streaming actives, partagé entre les tâches machine
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    machines: Shared<BTreeMap<String, Arc<StreamStats>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            machines: new_state(BTreeMap::new()),
        }
    }

    pub fn register(&self, machine: &str, stats: Arc<StreamStats>) {
        self.machines.lock().insert(machine.to_string(), stats);
    }

    pub fn unregister(&self, machine: &str) {
        self.machines.lock().remove(machine);
    }

    pub fn get_health(&self) -> CollectorHealth {
        let machines: BTreeMap<String, StreamStatsSnapshot> = self
            .machines
            .lock()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();

        CollectorHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            machines_streaming: machines.len() as u32,
            memory_usage_mb: get_memory_usage_mb(),
            machines,
        }
    }

    /// Publie le health toutes les `period` jusqu'à annulation
    pub fn spawn_health_publisher<S: TelemetrySink>(
        &self,
        sink: S,
        topic: String,
        period: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let health = tracker.get_health();
                        match publish_json(&sink, &topic, &health).await {
                            Ok(()) => debug!(
                                uptime = health.uptime_seconds,
                                machines = health.machines_streaming,
                                "published collector health"
                            ),
                            Err(e) => warn!(error = %e, "failed to publish collector health"),
                        }
                    }
                }
            }
        })
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}
