/*!
Test Harness pour clients / collecteurs MTConnect

Facilite l'écriture de tests d'intégration avec:
- Agent MTConnect simulé démarré automatiquement
- Stub MQTT pour les publications du collecteur
- Attentes sur le nombre de requêtes reçues par endpoint
*/

use crate::agent_stub::{AgentEndpoint, MockAgent};
use crate::mqtt_stub::MockMqttClient;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Harness de test : un agent simulé + un client MQTT simulé
pub struct TestHarness {
    pub agent: MockAgent,
    pub mqtt_client: MockMqttClient,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    endpoint: AgentEndpoint,
    min_count: usize,
}

impl TestHarness {
    pub async fn start() -> Result<Self> {
        env_logger::builder().is_test(true).try_init().ok();

        Ok(Self {
            agent: MockAgent::start().await?,
            mqtt_client: MockMqttClient::new(),
            expectations: Vec::new(),
        })
    }

    /// On s'attend à au moins N requêtes sur un endpoint
    pub fn expect_requests(&mut self, endpoint: AgentEndpoint, min_count: usize) -> &mut Self {
        self.expectations.push(Expectation { endpoint, min_count });
        self
    }

    /// Attend que l'agent ait reçu `count` requêtes sur `endpoint` ; `false` au timeout
    pub async fn wait_for_requests(&self, endpoint: AgentEndpoint, count: usize, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        while tokio::time::Instant::now() < deadline {
            if self.agent.requests_for(endpoint).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        log::warn!("⏰ Timeout waiting for {} {:?} requests", count, endpoint);
        false
    }

    /// Attend un message JSON publié sur un topic
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Result<Option<Value>> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        while tokio::time::Instant::now() < deadline {
            if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
                return Ok(Some(msg));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        log::warn!("⏰ Timeout waiting for message on {}", topic);
        Ok(None)
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual = self.agent.requests_for(expectation.endpoint).len();
            if actual < expectation.min_count {
                anyhow::bail!(
                    "Expectation failed for {:?}: expected at least {} requests, got {}",
                    expectation.endpoint,
                    expectation.min_count,
                    actual
                );
            }
            log::info!("✅ {:?}: {} requests", expectation.endpoint, actual);
        }
        Ok(())
    }

    pub fn request_counts(&self) -> HashMap<AgentEndpoint, usize> {
        let mut counts = HashMap::new();
        for endpoint in self.agent.endpoints() {
            *counts.entry(endpoint).or_insert(0) += 1;
        }
        counts
    }

    pub fn reset(&mut self) {
        self.agent.clear_requests();
        self.mqtt_client.clear();
        self.expectations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_tracks_agent_requests() {
        let mut harness = TestHarness::start().await.unwrap();
        harness.agent.push_probe("<MTConnectDevices/>");
        harness.expect_requests(AgentEndpoint::Probe, 1);

        assert!(harness.verify_expectations().is_err());
        reqwest::get(format!("{}/probe", harness.agent.base_url())).await.unwrap();

        assert!(harness.wait_for_requests(AgentEndpoint::Probe, 1, 1000).await);
        harness.verify_expectations().unwrap();
        assert_eq!(harness.request_counts().get(&AgentEndpoint::Probe), Some(&1));

        harness.reset();
        assert!(harness.request_counts().is_empty());
    }
}
