/*!
# MTConnect DevKit - Stubs et utilitaires de test

Bibliothèque facilitant le test des clients / collecteurs MTConnect avec:
- Agent MTConnect simulé (serveur HTTP local, réponses scriptées)
- Builders de documents `probe` / `current` / `sample` / `MTConnectError`
- Stub MQTT pour tester la publication sans broker
- Harness avec attentes sur les requêtes reçues par l'agent
*/

pub mod agent_stub;
pub mod documents;
pub mod mqtt_stub;
pub mod test_utils;

pub use agent_stub::{AgentEndpoint, AgentRequest, MockAgent};
pub use documents::{error_document, timestamp_at, ComponentSpec, ProbeBuilder, StreamsBuilder};
pub use mqtt_stub::{MockMessage, MockMqttClient};
pub use test_utils::TestHarness;
