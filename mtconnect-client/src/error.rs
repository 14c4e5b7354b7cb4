//! Error taxonomy of the client.
//!
//! - `TransportError` : réseau / HTTP, remonté à l'appelant, jamais rejoué en interne
//! - `ProbeError` : topologie invalide, fatal pour l'initialisation du client
//! - `DecodeError` : lot `current`/`sample` inexploitable, fatal pour le cycle seulement
//! - `ClientError` : enveloppe publique + erreurs d'usage (fetch avant probe)

use crate::xml::XmlError;

/// Erreurs de transport HTTP vers l'agent
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid agent url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent answered HTTP {status} for {url}")]
    Status { status: u16, url: String },
}

/// Erreurs de décodage d'une réponse `probe`
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("malformed probe document: {0}")]
    Xml(#[from] XmlError),
    #[error("probe document has no Devices element")]
    MissingDevices,
    #[error("<{element}> without required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: &'static str },
    #[error("data item id '{0}' is declared more than once")]
    DuplicateDataItem(String),
}

/// Erreurs qui invalident un lot complet (aucun échantillon appliqué)
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("data item '{data_item_id}' has an unparsable timestamp '{raw}'")]
    Timestamp { data_item_id: String, raw: String },
    #[error("data item '{data_item_id}' has an unparsable sequence '{raw}'")]
    Sequence { data_item_id: String, raw: String },
    #[error("data item '{data_item_id}' has no '{attribute}' attribute")]
    MissingAttribute { data_item_id: String, attribute: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot get data item values: agent has not been probed yet")]
    NotProbed,
    #[error("agent has already been probed")]
    AlreadyProbed,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("agent instance kept changing during resync ({attempts} attempts)")]
    ResyncExhausted { attempts: u32 },
    #[error("streaming task failed: {0}")]
    TaskFailed(String),
}
