/*!
TELEMETRY - Conversion des changements de data items en lignes publiables

RÔLE :
Un `RecordBuffer` par machine accumule une ligne par data item modifié
(`ItemChanged`) et rend le lot complet à la fin du batch (`ItemsChanged`).

FORMAT D'UNE LIGNE :
session_id, record_id (uuid v4), machine_id, name, value, sequence, timestamp, session_row_count
Les data items sans `name` ne sont pas publiés.
*/

use chrono::{Local, NaiveDateTime};
use mtconnect_client::DataItem;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub session_id: String,
    pub record_id: Uuid,
    pub machine_id: String,
    pub name: String,
    pub value: String,
    pub sequence: u64,
    pub timestamp: NaiveDateTime,
    pub session_row_count: u64,
}

/// Message publié sur `<prefix>/<machine>/samples@v1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    pub message_id: Uuid,
    pub machine_id: String,
    pub session_id: String,
    pub records: Vec<TelemetryRecord>,
}

#[derive(Debug)]
pub struct RecordBuffer {
    machine_id: String,
    session_id: String,
    row_count: u64,
    pending: Vec<TelemetryRecord>,
}

impl RecordBuffer {
    pub fn new(machine_id: &str) -> Self {
        let session_id = format!("{}_{}", machine_id, Local::now().format("%Y_%m_%d_%H_%M_%S"));
        Self::with_session(machine_id, session_id)
    }

    pub fn with_session(machine_id: &str, session_id: String) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            session_id,
            row_count: 0,
            pending: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Lignes émises depuis le début de la session
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Ajoute une ligne ; `false` si l'item est ignoré (pas de nom ou pas d'échantillon)
    pub fn record(&mut self, item: &DataItem) -> bool {
        let Some(name) = item.name.as_deref().filter(|n| !n.is_empty()) else {
            return false;
        };
        let Some(sample) = item.current_sample() else {
            return false;
        };

        self.row_count += 1;
        self.pending.push(TelemetryRecord {
            session_id: self.session_id.clone(),
            record_id: Uuid::new_v4(),
            machine_id: self.machine_id.clone(),
            name: name.to_string(),
            value: sample.value.clone(),
            sequence: sample.sequence,
            timestamp: sample.timestamp,
            session_row_count: self.row_count,
        });
        true
    }

    /// Vide le buffer ; `None` si aucune ligne n'est en attente
    pub fn take_batch(&mut self) -> Option<SampleBatch> {
        if self.pending.is_empty() {
            return None;
        }
        Some(SampleBatch {
            message_id: Uuid::new_v4(),
            machine_id: self.machine_id.clone(),
            session_id: self.session_id.clone(),
            records: std::mem::take(&mut self.pending),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtconnect_client::{DecodeOutcome, StreamDecoder, ChangeDispatcher};
    use mtconnect_devkit::{timestamp_at, ComponentSpec, ProbeBuilder, StreamsBuilder};

    fn changed_items() -> Vec<DataItem> {
        let probe = ProbeBuilder::new(1)
            .device(
                ComponentSpec::device("d1", "mill")
                    .data_item("exec", "EVENT", "EXECUTION")
                    .data_item_full("anon", None, "SAMPLE", "LOAD", None, Some("PERCENT")),
            )
            .build();
        let mut topology = mtconnect_client::probe::decode_probe(&probe).unwrap();

        let items = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = items.clone();
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.on_item_changed(move |item| sink.lock().unwrap().push(item.clone()));

        let doc = StreamsBuilder::new(1, "mill")
            .sequences(3, 4)
            .observation("Execution", "exec", &timestamp_at(0), 2, "ACTIVE")
            .observation("Load", "anon", &timestamp_at(1), 3, "12")
            .build();
        let outcome = StreamDecoder::new().decode(&doc, &mut topology, &mut dispatcher).unwrap();
        assert!(matches!(outcome, DecodeOutcome::Applied(_)));

        let items = items.lock().unwrap().clone();
        items
    }

    #[test]
    fn test_unnamed_items_are_skipped() {
        let mut buffer = RecordBuffer::with_session("mill-1", "mill-1_session".into());
        let recorded: Vec<bool> = changed_items().iter().map(|i| buffer.record(i)).collect();
        assert_eq!(recorded, vec![true, false]);

        let batch = buffer.take_batch().unwrap();
        assert_eq!(batch.records.len(), 1);
        let row = &batch.records[0];
        assert_eq!(row.session_id, "mill-1_session");
        assert_eq!(row.machine_id, "mill-1");
        assert_eq!(row.name, "exec");
        assert_eq!(row.value, "ACTIVE");
        assert_eq!(row.sequence, 2);
        assert_eq!(row.session_row_count, 1);
    }

    #[test]
    fn test_row_count_spans_batches() {
        let items = changed_items();
        let mut buffer = RecordBuffer::new("mill");
        assert!(buffer.session_id().starts_with("mill_"));

        buffer.record(&items[0]);
        let first = buffer.take_batch().unwrap();
        assert!(buffer.take_batch().is_none());
        buffer.record(&items[0]);
        let second = buffer.take_batch().unwrap();

        assert_eq!(first.records[0].session_row_count, 1);
        assert_eq!(second.records[0].session_row_count, 2);
        assert_ne!(first.message_id, second.message_id);
        assert_ne!(first.records[0].record_id, second.records[0].record_id);
    }
}
