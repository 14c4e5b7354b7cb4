//! MQTT sink : publication des lots de télémétrie et du health
//!
//! `TelemetrySink` isole le collecteur de `rumqttc::AsyncClient` pour
//! pouvoir le tester avec le `MockMqttClient` du devkit.

use crate::config::MqttConf;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub trait TelemetrySink: Clone + Send + Sync + 'static {
    fn publish_bytes(&self, topic: String, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

impl TelemetrySink for AsyncClient {
    async fn publish_bytes(&self, topic: String, payload: Vec<u8>) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }
}

/// Sérialise en JSON puis publie
pub async fn publish_json<S: TelemetrySink, T: Serialize>(sink: &S, topic: &str, message: &T) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    debug!(topic, bytes = payload.len(), "publishing");
    sink.publish_bytes(topic.to_string(), payload).await
}

/// Client MQTT + tâche qui fait tourner l'eventloop jusqu'à annulation
pub fn connect_mqtt(conf: &MqttConf, token: CancellationToken) -> (AsyncClient, JoinHandle<()>) {
    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 100);
    let broker = format!("{}:{}", conf.host, conf.port);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => info!(%broker, "MQTT connected"),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%broker, error = ?e, "MQTT connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                },
            }
        }
    });

    (client, handle)
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use mtconnect_devkit::MockMqttClient;

    impl TelemetrySink for MockMqttClient {
        async fn publish_bytes(&self, topic: String, payload: Vec<u8>) -> Result<()> {
            self.publish(topic, QoS::AtLeastOnce, false, payload).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtconnect_devkit::MockMqttClient;

    #[tokio::test]
    async fn test_publish_json_uses_topic_and_payload() {
        let sink = MockMqttClient::new();
        publish_json(&sink, "mtconnect/mill/samples@v1", &serde_json::json!({ "rows": 3 }))
            .await
            .unwrap();

        let messages = sink.find_messages_by_topic("mtconnect/mill/samples@v1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].qos, QoS::AtLeastOnce);
        let value: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(value["rows"], 3);
    }
}
