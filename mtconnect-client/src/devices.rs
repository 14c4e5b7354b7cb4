//! Découverte des machines exposées par un agent (sans construire de topologie)

use crate::error::{ClientError, ProbeError};
use crate::transport::{AgentTransport, Endpoint, HttpTransport};
use crate::xml;

/// Noms des `Device` déclarés dans la réponse `probe`, dans l'ordre du document.
/// Un device sans attribut `name` est ignoré.
pub async fn list_device_names<T: AgentTransport>(transport: &T) -> Result<Vec<String>, ClientError> {
    let body = transport.get(Endpoint::Probe, &[]).await?;
    let root = xml::parse(&body).map_err(ProbeError::from)?;
    let devices = root.find("Devices").ok_or(ProbeError::MissingDevices)?;

    Ok(devices
        .children_named("Device")
        .filter_map(|d| d.attr("name"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

pub async fn list_device_names_at(agent_uri: &str) -> Result<Vec<String>, ClientError> {
    let transport = HttpTransport::new(agent_uri)?;
    list_device_names(&transport).await
}
