//! Projection of master and update documents onto [`DeviceTree`]

use super::ModelError;
use super::tree::{Channel, Device, DeviceTree, Floor};
use crate::protocol::xml::{Element, Node};
use std::collections::{BTreeMap, HashMap};

/// Serial prefix reserved for scenes
pub const SCENE_PREFIX: &str = "FFFF";

const READY: &str = "ready";

/// Datapoint containers and the element name of their entries
const DATAPOINT_GROUPS: [(&str, &str); 3] = [
    ("inputs", "dataPoint"),
    ("outputs", "dataPoint"),
    ("parameters", "parameter"),
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Master,
    Update,
}

/// Parse the full master document
///
/// # Errors
///
/// Returns error if the XML is malformed or the strings table is missing
pub fn parse_master(xml: &str) -> Result<DeviceTree, ModelError> {
    let root = Element::parse(xml)?;

    let strings = root
        .get_child("strings")
        .ok_or(ModelError::MissingSection("strings"))?;
    let names: HashMap<&str, String> = strings
        .children_named("string")
        .filter_map(|s| s.get_attr("nameId").map(|id| (id, s.text_content())))
        .collect();

    let pairing = root
        .get_child("descriptions")
        .map(parse_descriptions)
        .unwrap_or_default();

    let mut tree = DeviceTree::new();
    if let Some(floorplan) = root.get_child("floorplan") {
        tree.floors = parse_floorplan(floorplan);
    }
    parse_devices(&root, Mode::Master, &names, &pairing, &mut tree);

    tracing::debug!(
        "Parsed master data: {} devices, {} datapoints",
        tree.devices.len(),
        tree.datapoint_count()
    );
    Ok(tree)
}

/// Parse an incremental update fragment
///
/// # Errors
///
/// Returns error if the XML is malformed or the root is not marked as an update
pub fn parse_update(xml: &str) -> Result<DeviceTree, ModelError> {
    let root = Element::parse(xml)?;
    if root.get_attr("type") != Some("update") {
        return Err(ModelError::NotAnUpdate);
    }

    let mut tree = DeviceTree::new();
    parse_devices(&root, Mode::Update, &HashMap::new(), &HashMap::new(), &mut tree);
    Ok(tree)
}

fn parse_floorplan(floorplan: &Element) -> BTreeMap<String, Floor> {
    floorplan
        .children_named("floor")
        .filter_map(|floor| {
            let uid = floor.get_attr("uid")?;
            let rooms = floor
                .children_named("room")
                .filter_map(|room| {
                    Some((
                        room.get_attr("uid")?.to_string(),
                        room.get_attr("name").unwrap_or_default().to_string(),
                    ))
                })
                .collect();
            Some((
                uid.to_string(),
                Floor {
                    name: floor.get_attr("name").unwrap_or_default().to_string(),
                    rooms,
                },
            ))
        })
        .collect()
}

/// Channel descriptor id → datapoint id → pairing id
fn parse_descriptions(descriptions: &Element) -> HashMap<String, HashMap<String, u32>> {
    descriptions
        .children_named("channelDescription")
        .filter_map(|description| {
            let cid = description.get_attr("cid")?;
            let datapoints = ["inputs", "outputs"]
                .into_iter()
                .filter_map(|group| description.get_child(group))
                .flat_map(|group| group.children_named("dataPoint"))
                .filter_map(|dp| {
                    let id = dp.get_attr("i")?;
                    let pairing = dp.get_attr("pairingId")?.parse().ok()?;
                    Some((id.to_string(), pairing))
                })
                .collect();
            Some((cid.to_string(), datapoints))
        })
        .collect()
}

fn parse_devices(
    root: &Element,
    mode: Mode,
    names: &HashMap<&str, String>,
    pairing: &HashMap<String, HashMap<String, u32>>,
    tree: &mut DeviceTree,
) {
    let Some(devices) = root.get_child("devices") else {
        return;
    };

    for element in devices.children_named("device") {
        let Some(serial) = element.get_attr("serialNumber") else {
            tracing::warn!("Skipping device without serial number");
            continue;
        };
        if serial.starts_with(SCENE_PREFIX) {
            continue;
        }

        let ready = element.get_attr("commissioningState") == Some(READY);
        if mode == Mode::Update && !ready {
            continue;
        }

        let mut device = Device::new(serial);
        if mode == Mode::Master {
            device.device_id = element.get_attr("deviceId").map(str::to_string);
            device.type_name = element
                .get_attr("nameId")
                .and_then(|id| names.get(id))
                .cloned();
        }

        if ready {
            if let Some(channels) = element.get_child("channels") {
                for channel in channels.children_named("channel") {
                    let Some(id) = channel.get_attr("i") else {
                        continue;
                    };
                    device
                        .channels
                        .insert(id.to_string(), parse_channel(channel, mode, pairing));
                }
            }
        }

        tree.devices.insert(serial.to_string(), device);
    }
}

fn parse_channel(
    element: &Element,
    mode: Mode,
    pairing: &HashMap<String, HashMap<String, u32>>,
) -> Channel {
    let mut channel = Channel::default();

    for (group, entry) in DATAPOINT_GROUPS {
        let Some(group) = element.get_child(group) else {
            continue;
        };
        for datapoint in group.children_named(entry) {
            let Some(id) = datapoint.get_attr("i") else {
                continue;
            };
            for value in datapoint.children_named("value") {
                if let Some(value) = single_text(value) {
                    channel.datapoints.insert(id.to_string(), value.to_string());
                }
            }
        }
    }

    if mode == Mode::Master {
        for attribute in element.children_named("attribute") {
            let text = Some(attribute.text_content());
            match attribute.get_attr("name") {
                Some("displayName") => channel.display_name = text,
                Some("floor") => channel.floor = text,
                Some("room") => channel.room = text,
                Some("iconId") => channel.icon_id = text,
                Some("functionId") => channel.function_id = text,
                _ => {}
            }
        }

        if let Some(descriptor) = element.get_attr("cid").and_then(|cid| pairing.get(cid)) {
            for group in ["inputs", "outputs"] {
                let Some(group) = element.get_child(group) else {
                    continue;
                };
                for datapoint in group.children_named("dataPoint") {
                    if let Some((id, pairing_id)) = datapoint
                        .get_attr("i")
                        .and_then(|id| descriptor.get(id).map(|p| (id, *p)))
                    {
                        channel.pairing_ids.insert(id.to_string(), pairing_id);
                    }
                }
            }
        }
    }

    channel
}

/// Text of a `value` element with exactly one child node
fn single_text(value: &Element) -> Option<&str> {
    match value.nodes() {
        [Node::Text(text)] => Some(text),
        _ => None,
    }
}
