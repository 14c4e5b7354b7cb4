/*!
Builders de documents MTConnect pour les tests

- `ProbeBuilder` : `MTConnectDevices` (Devices → Components → DataItems)
- `StreamsBuilder` : `MTConnectStreams` (Header + observations)
- `error_document` : `MTConnectError` avec un code d'erreur
*/

use chrono::{DateTime, Duration, SecondsFormat, Utc};

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn attr(name: &str, value: Option<&str>) -> String {
    value
        .map(|v| format!(r#" {}="{}""#, name, escape(v)))
        .unwrap_or_default()
}

/// Timestamp ISO 8601 UTC décalé de `seconds` depuis le 2024-03-01T10:00:00Z
pub fn timestamp_at(seconds: i64) -> String {
    let base = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default();
    (base + Duration::seconds(seconds)).to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone)]
struct DataItemSpec {
    id: String,
    name: Option<String>,
    category: String,
    kind: String,
    sub_type: Option<String>,
    units: Option<String>,
}

/// Device ou Component d'un document `probe`
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    element: String,
    id: String,
    name: Option<String>,
    items: Vec<DataItemSpec>,
    children: Vec<ComponentSpec>,
}

impl ComponentSpec {
    pub fn device(id: &str, name: &str) -> Self {
        Self::component("Device", id, Some(name))
    }

    pub fn component(element: &str, id: &str, name: Option<&str>) -> Self {
        Self {
            element: element.to_string(),
            id: id.to_string(),
            name: name.map(str::to_string),
            items: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn data_item(self, id: &str, category: &str, kind: &str) -> Self {
        self.data_item_full(id, Some(id), category, kind, None, None)
    }

    pub fn data_item_full(
        mut self,
        id: &str,
        name: Option<&str>,
        category: &str,
        kind: &str,
        sub_type: Option<&str>,
        units: Option<&str>,
    ) -> Self {
        self.items.push(DataItemSpec {
            id: id.to_string(),
            name: name.map(str::to_string),
            category: category.to_string(),
            kind: kind.to_string(),
            sub_type: sub_type.map(str::to_string),
            units: units.map(str::to_string),
        });
        self
    }

    pub fn child(mut self, component: ComponentSpec) -> Self {
        self.children.push(component);
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!(
            "<{}{}{}>",
            self.element,
            attr("id", Some(&self.id)),
            attr("name", self.name.as_deref())
        ));

        if !self.items.is_empty() {
            out.push_str("<DataItems>");
            for item in &self.items {
                out.push_str(&format!(
                    "<DataItem{}{}{}{}{}{}/>",
                    attr("id", Some(&item.id)),
                    attr("name", item.name.as_deref()),
                    attr("category", Some(&item.category)),
                    attr("type", Some(&item.kind)),
                    attr("subType", item.sub_type.as_deref()),
                    attr("units", item.units.as_deref()),
                ));
            }
            out.push_str("</DataItems>");
        }

        if !self.children.is_empty() {
            out.push_str("<Components>");
            for child in &self.children {
                child.render(out);
            }
            out.push_str("</Components>");
        }

        out.push_str(&format!("</{}>", self.element));
    }
}

/// Document `probe` complet
#[derive(Debug, Clone)]
pub struct ProbeBuilder {
    instance_id: u64,
    devices: Vec<ComponentSpec>,
}

impl ProbeBuilder {
    pub fn new(instance_id: u64) -> Self {
        Self {
            instance_id,
            devices: Vec::new(),
        }
    }

    pub fn device(mut self, device: ComponentSpec) -> Self {
        self.devices.push(device);
        self
    }

    pub fn build(&self) -> String {
        let mut out = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><MTConnectDevices xmlns="urn:mtconnect.org:MTConnectDevices:1.3"><Header creationTime="{}" sender="mock" instanceId="{}" version="1.3" bufferSize="131072"/><Devices>"#,
            timestamp_at(0),
            self.instance_id
        );
        for device in &self.devices {
            device.render(&mut out);
        }
        out.push_str("</Devices></MTConnectDevices>");
        out
    }
}

#[derive(Debug, Clone)]
struct ObservationSpec {
    element: String,
    data_item_id: String,
    timestamp: String,
    sequence: String,
    value: String,
}

/// Document `current` / `sample`
#[derive(Debug, Clone)]
pub struct StreamsBuilder {
    instance_id: Option<u64>,
    first_sequence: u64,
    last_sequence: Option<u64>,
    next_sequence: Option<u64>,
    device: String,
    observations: Vec<ObservationSpec>,
}

impl StreamsBuilder {
    pub fn new(instance_id: u64, device: &str) -> Self {
        Self {
            instance_id: Some(instance_id),
            first_sequence: 1,
            last_sequence: None,
            next_sequence: None,
            device: device.to_string(),
            observations: Vec::new(),
        }
    }

    /// `lastSequence` / `nextSequence` ; sans appel, les attributs sont absents du Header
    pub fn sequences(mut self, last: u64, next: u64) -> Self {
        self.last_sequence = Some(last);
        self.next_sequence = Some(next);
        self
    }

    pub fn without_next_sequence(mut self) -> Self {
        self.next_sequence = None;
        self
    }

    pub fn without_instance_id(mut self) -> Self {
        self.instance_id = None;
        self
    }

    pub fn observation(self, element: &str, data_item_id: &str, timestamp: &str, sequence: u64, value: &str) -> Self {
        self.raw_observation(element, data_item_id, timestamp, &sequence.to_string(), value)
    }

    /// Observation aux attributs libres (timestamp ou sequence invalides)
    pub fn raw_observation(
        mut self,
        element: &str,
        data_item_id: &str,
        timestamp: &str,
        sequence: &str,
        value: &str,
    ) -> Self {
        self.observations.push(ObservationSpec {
            element: element.to_string(),
            data_item_id: data_item_id.to_string(),
            timestamp: timestamp.to_string(),
            sequence: sequence.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn build(&self) -> String {
        let instance = self.instance_id.map(|i| i.to_string());
        let last = self.last_sequence.map(|s| s.to_string());
        let next = self.next_sequence.map(|s| s.to_string());

        let mut out = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><MTConnectStreams xmlns="urn:mtconnect.org:MTConnectStreams:1.3"><Header creationTime="{}" sender="mock"{} firstSequence="{}"{}{} bufferSize="131072"/><Streams><DeviceStream{}><ComponentStream component="Device" componentId="{}"><Events>"#,
            timestamp_at(0),
            attr("instanceId", instance.as_deref()),
            self.first_sequence,
            attr("lastSequence", last.as_deref()),
            attr("nextSequence", next.as_deref()),
            attr("name", Some(&self.device)),
            escape(&self.device),
        );
        for obs in &self.observations {
            out.push_str(&format!(
                "<{el}{}{}{}>{}</{el}>",
                attr("dataItemId", Some(&obs.data_item_id)),
                attr("timestamp", Some(&obs.timestamp)),
                attr("sequence", Some(&obs.sequence)),
                escape(&obs.value),
                el = obs.element,
            ));
        }
        out.push_str("</Events></ComponentStream></DeviceStream></Streams></MTConnectStreams>");
        out
    }
}

/// Document `MTConnectError` tel que renvoyé par un agent (ex: `OUT_OF_RANGE`)
pub fn error_document(instance_id: u64, code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><MTConnectError xmlns="urn:mtconnect.org:MTConnectError:1.3"><Header creationTime="{}" sender="mock" instanceId="{}" version="1.3" bufferSize="131072"/><Errors><Error errorCode="{}">{}</Error></Errors></MTConnectError>"#,
        timestamp_at(0),
        instance_id,
        escape(code),
        escape(message)
    )
}
