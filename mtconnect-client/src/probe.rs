/*!
PROBE DECODER - Construction de la topologie depuis une réponse `probe`

FONCTIONNEMENT :
1. Localise le conteneur `Devices` (n'importe où dans le document)
2. Chaque enfant direct devient un Device ; `Components` / `DataItems` sont descendus récursivement
3. Passe d'aplatissement : parcours en profondeur de chaque Device puis de ses Components,
   insertion de chaque DataItem dans l'index plat ; un id en double est une erreur fatale

Rien n'est exposé tant que les trois étapes n'ont pas réussi.
*/

use crate::error::ProbeError;
use crate::model::{collect_component_items, Component, DataItem, Device, ItemHandle, Topology};
use crate::xml::{self, Element};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Décode un document `probe` complet
pub fn decode_probe(raw: &str) -> Result<Topology, ProbeError> {
    let root = xml::parse(raw)?;
    let devices_el = root.find("Devices").ok_or(ProbeError::MissingDevices)?;

    let mut arena: Vec<DataItem> = Vec::new();
    let mut devices = Vec::with_capacity(devices_el.children.len());
    for device_el in &devices_el.children {
        devices.push(build_device(device_el, &mut arena)?);
    }

    let index = flatten(&devices, &arena)?;
    Ok(Topology::from_parts(devices, arena, index))
}

fn required_id(element: &Element) -> Result<String, ProbeError> {
    element
        .attr("id")
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProbeError::MissingAttribute {
            element: element.name.clone(),
            attribute: "id",
        })
}

fn optional(element: &Element, name: &str) -> Option<String> {
    element.attr(name).map(str::to_string)
}

fn build_device(element: &Element, arena: &mut Vec<DataItem>) -> Result<Device, ProbeError> {
    let description = element
        .child("Description")
        .map(|d| d.value().trim().to_string())
        .filter(|d| !d.is_empty());

    Ok(Device {
        id: required_id(element)?,
        name: optional(element, "name"),
        uuid: optional(element, "uuid"),
        description,
        data_items: build_data_items(element, arena)?,
        components: build_components(element, arena)?,
    })
}

fn build_component(element: &Element, arena: &mut Vec<DataItem>) -> Result<Component, ProbeError> {
    Ok(Component {
        id: required_id(element)?,
        name: optional(element, "name"),
        kind: element.name.clone(),
        data_items: build_data_items(element, arena)?,
        components: build_components(element, arena)?,
    })
}

fn build_components(parent: &Element, arena: &mut Vec<DataItem>) -> Result<Vec<Component>, ProbeError> {
    let mut components = Vec::new();
    for container in parent.children_named("Components") {
        for child in &container.children {
            components.push(build_component(child, arena)?);
        }
    }
    Ok(components)
}

fn build_data_items(parent: &Element, arena: &mut Vec<DataItem>) -> Result<Vec<ItemHandle>, ProbeError> {
    let mut handles = Vec::new();
    for container in parent.children_named("DataItems") {
        for item_el in container.children_named("DataItem") {
            let mut item = DataItem::new(required_id(item_el)?);
            item.name = optional(item_el, "name");
            item.category = optional(item_el, "category");
            item.kind = optional(item_el, "type");
            item.sub_type = optional(item_el, "subType");
            item.units = optional(item_el, "units");

            handles.push(ItemHandle(arena.len()));
            arena.push(item);
        }
    }
    Ok(handles)
}

/// Index plat id -> handle ; refuse tout identifiant déclaré deux fois
fn flatten(devices: &[Device], arena: &[DataItem]) -> Result<HashMap<String, ItemHandle>, ProbeError> {
    let mut index = HashMap::with_capacity(arena.len());
    for device in devices {
        let mut handles = device.data_items.clone();
        collect_component_items(&device.components, &mut handles);

        for handle in handles {
            let id = &arena[handle.0].id;
            match index.entry(id.clone()) {
                Entry::Occupied(_) => return Err(ProbeError::DuplicateDataItem(id.clone())),
                Entry::Vacant(slot) => {
                    slot.insert(handle);
                }
            }
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectDevices xmlns="urn:mtconnect.org:MTConnectDevices:1.3">
  <Header creationTime="2024-03-01T10:00:00Z" instanceId="1" bufferSize="131072"/>
  <Devices>
    <Device id="d1" name="VMC-3Axis" uuid="000">
      <Description manufacturer="SystemInsights">Basic 3 axis VMC</Description>
      <DataItems>
        <DataItem id="avail" name="avail" category="EVENT" type="AVAILABILITY"/>
      </DataItems>
      <Components>
        <Axes id="a" name="base">
          <DataItems>
            <DataItem id="load" category="SAMPLE" type="LOAD" units="PERCENT"/>
          </DataItems>
          <Components>
            <Linear id="x" name="X">
              <DataItems>
                <DataItem id="xpos" name="Xact" category="SAMPLE" type="POSITION" subType="ACTUAL" units="MILLIMETER"/>
              </DataItems>
            </Linear>
          </Components>
        </Axes>
        <Controller id="c" name="controller">
          <DataItems>
            <DataItem id="mode" name="mode" category="EVENT" type="CONTROLLER_MODE"/>
          </DataItems>
        </Controller>
      </Components>
    </Device>
  </Devices>
</MTConnectDevices>"#;

    #[test]
    fn test_probe_builds_tree_and_index() {
        let topology = decode_probe(PROBE).unwrap();
        assert_eq!(topology.devices().len(), 1);

        let device = &topology.devices()[0];
        assert_eq!(device.name.as_deref(), Some("VMC-3Axis"));
        assert_eq!(device.description.as_deref(), Some("Basic 3 axis VMC"));
        assert_eq!(device.components.len(), 2);
        assert_eq!(device.components[0].kind, "Axes");
        assert_eq!(device.components[0].components[0].kind, "Linear");

        assert_eq!(topology.len(), 4);
        let xpos = topology.data_item("xpos").unwrap();
        assert_eq!(xpos.sub_type.as_deref(), Some("ACTUAL"));
        assert_eq!(xpos.units.as_deref(), Some("MILLIMETER"));
        assert!(xpos.current_sample().is_none());
    }

    #[test]
    fn test_device_items_are_depth_first() {
        let topology = decode_probe(PROBE).unwrap();
        let ids: Vec<&str> = topology
            .device_items(&topology.devices()[0])
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["avail", "load", "xpos", "mode"]);
    }

    #[test]
    fn test_duplicate_data_item_id_is_fatal() {
        let doc = r#"<MTConnectDevices><Devices>
            <Device id="d1" name="a"><DataItems><DataItem id="dup"/></DataItems></Device>
            <Device id="d2" name="b"><Components><Axes id="ax"><DataItems><DataItem id="dup"/></DataItems></Axes></Components></Device>
        </Devices></MTConnectDevices>"#;

        match decode_probe(doc) {
            Err(ProbeError::DuplicateDataItem(id)) => assert_eq!(id, "dup"),
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_devices_container() {
        let doc = "<MTConnectDevices><Header instanceId=\"1\"/></MTConnectDevices>";
        assert!(matches!(decode_probe(doc), Err(ProbeError::MissingDevices)));
    }

    #[test]
    fn test_malformed_probe() {
        assert!(matches!(decode_probe("<MTConnectDevices><Devices>"), Err(ProbeError::Xml(_))));
    }

    #[test]
    fn test_data_item_without_id() {
        let doc = r#"<MTConnectDevices><Devices><Device id="d"><DataItems><DataItem type="X"/></DataItems></Device></Devices></MTConnectDevices>"#;
        assert!(matches!(
            decode_probe(doc),
            Err(ProbeError::MissingAttribute { attribute: "id", .. })
        ));
    }
}
