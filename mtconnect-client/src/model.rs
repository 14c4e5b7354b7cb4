/*!
TOPOLOGY MODEL - Arbre Device → Component → DataItem + magasin d'échantillons

RÔLE :
Représente ce que l'agent a déclaré au `probe`. L'arbre est figé après le probe ;
seul le slot "échantillon courant" de chaque DataItem évolue pendant le streaming.

FONCTIONNEMENT :
- Les DataItems vivent dans une arène (`Vec<DataItem>`) ; l'arbre ne contient que des `ItemHandle`
- L'index plat `id -> ItemHandle` donne un accès O(1) pendant le décodage des flux
- Aucun DataItem n'est jamais supprimé : un handle reste valide toute la vie de la topologie
*/

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;

/// Position stable d'un DataItem dans l'arène de la topologie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemHandle(pub(crate) usize);

impl ItemHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Dernière valeur connue d'un data item et sa provenance dans le journal de l'agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataItemSample {
    /// Valeur brute, le protocole n'en contraint pas le contenu
    pub value: String,
    /// Horodatage agent, sans fuseau
    pub timestamp: NaiveDateTime,
    /// Position dans le journal d'événements de l'agent
    pub sequence: u64,
}

impl DataItemSample {
    pub fn new(value: impl Into<String>, timestamp: NaiveDateTime, sequence: u64) -> Self {
        Self {
            value: value.into(),
            timestamp,
            sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataItem {
    pub id: String,
    pub name: Option<String>,
    /// SAMPLE, EVENT ou CONDITION
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub sub_type: Option<String>,
    pub units: Option<String>,
    current: Option<DataItemSample>,
}

impl DataItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            category: None,
            kind: None,
            sub_type: None,
            units: None,
            current: None,
        }
    }

    pub fn current_sample(&self) -> Option<&DataItemSample> {
        self.current.as_ref()
    }

    /// Nom déclaré, ou l'id à défaut
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.id)
    }

    pub(crate) fn replace_sample(&mut self, sample: DataItemSample) -> Option<DataItemSample> {
        self.current.replace(sample)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: String,
    pub name: Option<String>,
    /// Nom local de l'élément XML (Axes, Linear, Controller...)
    pub kind: String,
    pub components: Vec<Component>,
    pub data_items: Vec<ItemHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub description: Option<String>,
    pub components: Vec<Component>,
    pub data_items: Vec<ItemHandle>,
}

/// Topologie complète d'un agent, construite une fois par `probe`
#[derive(Debug, Clone, Default)]
pub struct Topology {
    devices: Vec<Device>,
    items: Vec<DataItem>,
    index: HashMap<String, ItemHandle>,
}

impl Topology {
    pub(crate) fn from_parts(
        devices: Vec<Device>,
        items: Vec<DataItem>,
        index: HashMap<String, ItemHandle>,
    ) -> Self {
        Self { devices, items, index }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, name_or_id: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.id == name_or_id || d.name.as_deref() == Some(name_or_id))
    }

    /// Lookup O(1) par identifiant
    pub fn data_item(&self, id: &str) -> Option<&DataItem> {
        self.index.get(id).map(|h| &self.items[h.0])
    }

    pub fn handle_of(&self, id: &str) -> Option<ItemHandle> {
        self.index.get(id).copied()
    }

    pub fn item(&self, handle: ItemHandle) -> &DataItem {
        &self.items[handle.0]
    }

    pub(crate) fn item_mut(&mut self, handle: ItemHandle) -> &mut DataItem {
        &mut self.items[handle.0]
    }

    /// Tous les data items, dans l'ordre du parcours en profondeur du probe
    pub fn data_items(&self) -> impl Iterator<Item = &DataItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Data items d'un device : les siens puis ceux de ses composants (profondeur d'abord)
    pub fn device_items(&self, device: &Device) -> Vec<&DataItem> {
        let mut handles = device.data_items.clone();
        collect_component_items(&device.components, &mut handles);
        handles.into_iter().map(|h| self.item(h)).collect()
    }
}

pub(crate) fn collect_component_items(components: &[Component], out: &mut Vec<ItemHandle>) {
    for component in components {
        out.extend_from_slice(&component.data_items);
        collect_component_items(&component.components, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn test_replace_sample_keeps_only_latest() {
        let mut item = DataItem::new("xpos");
        assert!(item.current_sample().is_none());

        assert!(item.replace_sample(DataItemSample::new("1.0", ts("2024-01-01T00:00:00"), 10)).is_none());
        let previous = item.replace_sample(DataItemSample::new("2.0", ts("2024-01-01T00:00:01"), 11));

        assert_eq!(previous.unwrap().value, "1.0");
        assert_eq!(item.current_sample().unwrap().sequence, 11);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut item = DataItem::new("avail");
        assert_eq!(item.display_name(), "avail");
        item.name = Some(String::new());
        assert_eq!(item.display_name(), "avail");
        item.name = Some("Availability".into());
        assert_eq!(item.display_name(), "Availability");
    }
}
