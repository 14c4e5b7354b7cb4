use mtconnect_client::{HttpTransportConfig, StreamOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "MTCONNECT_COLLECTOR_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    pub agent: AgentConf,
    pub polling: PollingConf,
    pub mqtt: MqttConf,
    pub health_interval_secs: u64,
    /// Répertoire des fichiers d'erreur fatale (créé au besoin)
    pub error_log_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AgentConf {
    pub base_url: String,
    /// Vide = découverte des devices via `probe` à la racine de l'agent
    pub devices: Vec<String>,
    /// Nombre de collecteurs par device (`<device>-1`, `<device>-2`...), 1 = nom du device
    pub replicas: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PollingConf {
    pub interval_ms: u64,
    pub record_count: u64,
    pub max_resync_attempts: u32,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for AgentConf {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            devices: Vec::new(),
            replicas: 1,
        }
    }
}

impl Default for PollingConf {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            record_count: 100,
            max_resync_attempts: 3,
            request_timeout_secs: Some(10),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "mtconnect-collector".into(),
            topic_prefix: "mtconnect".into(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            agent: AgentConf::default(),
            polling: PollingConf::default(),
            mqtt: MqttConf::default(),
            health_interval_secs: 30,
            error_log_path: "./logs".into(),
        }
    }
}

impl CollectorConfig {
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            interval: Duration::from_millis(self.polling.interval_ms),
            record_count: self.polling.record_count,
            max_resync_attempts: self.polling.max_resync_attempts,
        }
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            request_timeout: self.polling.request_timeout_secs.map(Duration::from_secs),
            ..HttpTransportConfig::default()
        }
    }

    /// URL d'un device : `<base_url>/<device>`
    pub fn device_url(&self, device: &str) -> String {
        format!("{}/{}", self.agent.base_url.trim_end_matches('/'), device)
    }

    /// Identifiants machine publiés pour un device, selon `replicas`
    pub fn machine_ids(&self, device: &str) -> Vec<String> {
        match self.agent.replicas {
            0 | 1 => vec![device.to_string()],
            n => (1..=n).map(|i| format!("{}-{}", device, i)).collect(),
        }
    }

    pub fn samples_topic(&self, machine: &str) -> String {
        format!("{}/{}/samples@v1", self.mqtt.topic_prefix, machine)
    }

    pub fn health_topic(&self) -> String {
        format!("{}/collector/health@v1", self.mqtt.topic_prefix)
    }
}

pub fn parse_config(txt: &str) -> Result<CollectorConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(CollectorConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> CollectorConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "collector.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from(path: &str) -> CollectorConfig {
    if !Path::new(path).exists() {
        info!(path, "no collector config file, using defaults");
        return CollectorConfig::default();
    }

    let txt = fs::read_to_string(path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        warn!(path, error = %e, "invalid collector config, using defaults");
        CollectorConfig::default()
    })
}
