/*!
STREAM DECODER - Application des réponses `current` / `sample`

RÔLE :
Maintient la position de lecture (instanceId, lastSequence, nextSequence) et applique
les observations d'un lot à la topologie, dans un ordre déterministe.

FONCTIONNEMENT (un appel = un lot) :
1. XML invalide → lot ignoré, aucun état modifié (`Malformed`)
2. `instanceId` différent de celui établi → redémarrage agent, retour en mode snapshot (`Restarted`)
3. `lastSequence` / `nextSequence` lus ; en cas d'absence : `lastSequence = nextSequence` (repli conservateur)
4. Observations (`dataItemId`) non vides triées par timestamp croissant (tri stable)
5. Application + notification par item ; id inconnu → ignoré, journalisé, rapporté ;
   séquence déjà appliquée pour cet item dans l'instance courante → doublon, ignoré
6. Notification de lot si au moins une observation retenue

Un timestamp illisible invalide le lot entier AVANT toute mutation : la position
n'avance pas et le tick suivant relit la même plage.
*/

use crate::dispatch::ChangeDispatcher;
use crate::error::DecodeError;
use crate::model::{DataItemSample, ItemHandle, Topology};
use crate::xml::{self, Element};
use chrono::{DateTime, NaiveDateTime};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Code d'erreur agent signalant un `from` sorti du buffer circulaire
pub const OUT_OF_RANGE: &str = "OUT_OF_RANGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPosition {
    /// Run d'agent de référence ; `None` tant qu'aucune réponse ne l'a établi
    pub instance_id: Option<u64>,
    pub last_sequence: u64,
    pub next_sequence: u64,
    /// Le prochain appel doit être un `current` (premier tick, après redémarrage)
    pub needs_snapshot: bool,
}

impl Default for StreamPosition {
    fn default() -> Self {
        Self {
            instance_id: None,
            last_sequence: 0,
            next_sequence: 0,
            needs_snapshot: true,
        }
    }
}

impl StreamPosition {
    pub fn next_request(&self, record_count: u64) -> StreamRequest {
        if self.needs_snapshot {
            StreamRequest::Current
        } else {
            StreamRequest::Sample {
                from: self.next_sequence,
                count: record_count,
            }
        }
    }

    /// Retour à l'état "premier passage" : plus d'instance de référence, snapshot requis
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRequest {
    Current,
    Sample { from: u64, count: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Échantillons effectivement remplacés (et notifiés)
    pub applied: usize,
    /// Observations déjà appliquées dans l'instance courante, non re-notifiées
    pub duplicates: usize,
    /// Identifiants absents de la topologie
    pub unknown: Vec<String>,
    /// Une notification de lot a été émise
    pub notified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Applied(BatchReport),
    /// Document illisible, cycle abandonné sans effet
    Malformed,
    /// L'agent a redémarré : rien n'a été appliqué, la position est réinitialisée
    Restarted { previous: u64, current: u64 },
    /// Document `MTConnectError` ; rien n'a été appliqué
    AgentError { codes: Vec<String> },
}

struct Observation {
    data_item_id: String,
    value: String,
    timestamp: NaiveDateTime,
    sequence: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StreamDecoder {
    position: StreamPosition,
    /// Plus haute séquence appliquée par item, valable pour l'instance adoptée seulement
    applied: HashMap<ItemHandle, u64>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> StreamPosition {
        self.position
    }

    pub(crate) fn position_mut(&mut self) -> &mut StreamPosition {
        &mut self.position
    }

    pub fn decode(
        &mut self,
        raw: &str,
        topology: &mut Topology,
        dispatcher: &mut ChangeDispatcher,
    ) -> Result<DecodeOutcome, DecodeError> {
        let root = match xml::parse(raw) {
            Ok(root) => root,
            Err(e) => {
                debug!(error = %e, "discarding malformed stream response");
                return Ok(DecodeOutcome::Malformed);
            }
        };

        let header = root.find("Header");
        let instance_id = header.and_then(|h| parse_u64(h.attr("instanceId")));

        if let Some(current) = instance_id {
            match self.position.instance_id {
                Some(previous) if previous != current => {
                    info!(previous, current, "agent instance changed, resetting stream position");
                    self.position.reset();
                    self.applied.clear();
                    return Ok(DecodeOutcome::Restarted { previous, current });
                }
                Some(_) => {}
                None => {
                    debug!(instance_id = current, "adopting agent instance");
                    self.position.instance_id = Some(current);
                    self.applied.clear();
                }
            }
        }

        if let Some(errors) = root.find("Errors") {
            let codes: Vec<String> = errors
                .children_named("Error")
                .map(|e| e.attr("errorCode").unwrap_or("UNKNOWN").to_string())
                .collect();
            warn!(?codes, "agent answered with an error document");
            if codes.iter().any(|c| c == OUT_OF_RANGE) {
                self.position.needs_snapshot = true;
            }
            return Ok(DecodeOutcome::AgentError { codes });
        }

        // Position calculée mais pas encore engagée : un timestamp invalide plus bas
        // ne doit pas faire avancer nextSequence.
        let mut next_position = self.position;
        let sequences = instance_id.and(header).and_then(|h| {
            Some((parse_u64(h.attr("lastSequence"))?, parse_u64(h.attr("nextSequence"))?))
        });
        match sequences {
            Some((last, next)) => {
                next_position.last_sequence = last;
                next_position.next_sequence = next_position.next_sequence.max(next);
            }
            None => {
                warn!(
                    next_sequence = self.position.next_sequence,
                    "incomplete stream header, retrying from last known sequence"
                );
                next_position.last_sequence = next_position.next_sequence;
            }
        }

        let observations = collect_observations(&root)?;
        self.position = next_position;

        let mut report = BatchReport::default();
        for obs in &observations {
            let Some(handle) = topology.handle_of(&obs.data_item_id) else {
                warn!(data_item_id = %obs.data_item_id, "stream references a data item unknown to the probe");
                report.unknown.push(obs.data_item_id.clone());
                continue;
            };

            if self.applied.get(&handle).is_some_and(|&seen| obs.sequence <= seen) {
                report.duplicates += 1;
                continue;
            }
            self.applied.insert(handle, obs.sequence);

            let sample = DataItemSample::new(obs.value.clone(), obs.timestamp, obs.sequence);
            topology.item_mut(handle).replace_sample(sample);
            report.applied += 1;
            dispatcher.item_changed(topology.item(handle));
        }

        if !observations.is_empty() {
            dispatcher.items_changed();
            report.notified = true;
        }

        debug!(
            applied = report.applied,
            duplicates = report.duplicates,
            unknown = report.unknown.len(),
            next_sequence = self.position.next_sequence,
            "stream batch decoded"
        );
        Ok(DecodeOutcome::Applied(report))
    }
}

fn parse_u64(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse().ok())
}

/// Observations retenues, triées par timestamp croissant (ordre du document en cas d'égalité)
fn collect_observations(root: &Element) -> Result<Vec<Observation>, DecodeError> {
    let mut observations = Vec::new();
    for element in root.walk().filter(|e| e.has_attr("dataItemId")) {
        let data_item_id = element.attr("dataItemId").unwrap_or_default();
        let value = element.value();
        if data_item_id.is_empty() || value.is_empty() {
            continue;
        }

        let raw_ts = element.attr("timestamp").ok_or_else(|| DecodeError::MissingAttribute {
            data_item_id: data_item_id.to_string(),
            attribute: "timestamp",
        })?;
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| DecodeError::Timestamp {
            data_item_id: data_item_id.to_string(),
            raw: raw_ts.to_string(),
        })?;

        let raw_seq = element.attr("sequence").ok_or_else(|| DecodeError::MissingAttribute {
            data_item_id: data_item_id.to_string(),
            attribute: "sequence",
        })?;
        let sequence = parse_u64(Some(raw_seq)).ok_or_else(|| DecodeError::Sequence {
            data_item_id: data_item_id.to_string(),
            raw: raw_seq.to_string(),
        })?;

        observations.push(Observation {
            data_item_id: data_item_id.to_string(),
            value,
            timestamp,
            sequence,
        });
    }

    observations.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(observations)
}

/// `2024-03-01T10:00:00.123456Z` → date-heure locale sans fuseau
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    let naive = trimmed.strip_suffix(['Z', 'z']).unwrap_or(trimmed);

    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.naive_local()))
}
