/*!
# MTConnect Client - Streaming simulé par polling sur un agent MTConnect

RÔLE :
Découvre la topologie d'une machine (probe), puis lit en continu ses data items
via `current` / `sample` en conservant la continuité de séquence entre deux polls.

FONCTIONNEMENT :
- `probe` construit l'arbre Device → Component → DataItem + l'index plat par id
- chaque tick émet `current` (premier tick / après redémarrage) ou `sample?from=&count=`
- le décodeur applique les échantillons par timestamp croissant et notifie les observateurs
- un changement d'`instanceId` (redémarrage agent) déclenche une resynchronisation bornée

EXEMPLE :
```no_run
use std::time::Duration;
use mtconnect_client::{MtConnectClient, StreamOptions};

# async fn run() -> Result<(), mtconnect_client::ClientError> {
let mut client = MtConnectClient::new("http://agent.local:5000/VMC-3Axis")?;
client.observers().on_item_changed(|item| {
    if let Some(sample) = item.current_sample() {
        println!("{} = {}", item.id, sample.value);
    }
});
client.probe().await?;

let session = client.start_streaming(StreamOptions {
    interval: Duration::from_secs(2),
    record_count: 200,
    ..StreamOptions::default()
})?;
// ...
let _client = session.stop().await?;
# Ok(())
# }
```
*/

pub mod client;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod probe;
pub mod stream;
pub mod transport;
pub mod xml;

pub use client::{ClientState, MtConnectClient, StreamOptions, StreamStats, StreamStatsSnapshot, StreamingSession};
pub use devices::{list_device_names, list_device_names_at};
pub use dispatch::{ChangeDispatcher, ClientEvent, EventChannel, NotificationKind, SubscriptionId};
pub use error::{ClientError, DecodeError, ProbeError, TransportError};
pub use model::{Component, DataItem, DataItemSample, Device, ItemHandle, Topology};
pub use stream::{BatchReport, DecodeOutcome, StreamDecoder, StreamPosition, StreamRequest};
pub use transport::{AgentTransport, Endpoint, HttpTransport, HttpTransportConfig};
