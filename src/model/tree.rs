use serde::Serialize;
use std::collections::BTreeMap;

/// One channel of a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Datapoint id → current value
    pub datapoints: BTreeMap<String, String>,
    /// Datapoint id → pairing id, from master data only
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pairing_ids: BTreeMap<String, u32>,
    /// User-visible name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Floor uid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor: Option<String>,
    /// Room uid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Icon id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_id: Option<String>,
    /// Function id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_id: Option<String>,
}

impl Channel {
    /// Value of a datapoint
    #[must_use]
    pub fn datapoint(&self, id: &str) -> Option<&str> {
        self.datapoints.get(id).map(String::as_str)
    }

    fn merge(&mut self, update: &Channel) {
        for (id, value) in &update.datapoints {
            self.datapoints.insert(id.clone(), value.clone());
        }
        for (id, pairing) in &update.pairing_ids {
            self.pairing_ids.insert(id.clone(), *pairing);
        }
        merge_field(&mut self.display_name, update.display_name.as_deref());
        merge_field(&mut self.floor, update.floor.as_deref());
        merge_field(&mut self.room, update.room.as_deref());
        merge_field(&mut self.icon_id, update.icon_id.as_deref());
        merge_field(&mut self.function_id, update.function_id.as_deref());
    }
}

/// A device and its channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Serial number, also the key in [`DeviceTree::devices`]
    pub serial_number: String,
    /// Hardware type id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Localized type name from the strings table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Channel id → channel
    pub channels: BTreeMap<String, Channel>,
}

impl Device {
    /// Empty device shell
    #[must_use]
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ..Self::default()
        }
    }

    fn merge(&mut self, update: &Device) {
        merge_field(&mut self.device_id, update.device_id.as_deref());
        merge_field(&mut self.type_name, update.type_name.as_deref());
        for (id, channel) in &update.channels {
            self.channels.entry(id.clone()).or_default().merge(channel);
        }
    }
}

/// A floor with its rooms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Floor {
    /// Floor name
    pub name: String,
    /// Room uid → room name
    pub rooms: BTreeMap<String, String>,
}

/// Devices keyed by serial number, plus the floor plan from master data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceTree {
    /// Serial number → device
    pub devices: BTreeMap<String, Device>,
    /// Floor uid → floor
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub floors: BTreeMap<String, Floor>,
}

impl DeviceTree {
    /// Empty tree
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Device by serial number
    #[must_use]
    pub fn device(&self, serial: &str) -> Option<&Device> {
        self.devices.get(serial)
    }

    /// True if the tree holds no devices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Merge an incremental update
    ///
    /// Unknown devices and channels are created; existing entries are only
    /// ever added to or overwritten, never removed.
    pub fn merge(&mut self, update: &DeviceTree) {
        for (serial, device) in &update.devices {
            self.devices
                .entry(serial.clone())
                .or_insert_with(|| Device::new(serial.clone()))
                .merge(device);
        }
        for (uid, floor) in &update.floors {
            let entry = self.floors.entry(uid.clone()).or_default();
            if !floor.name.is_empty() {
                entry.name.clone_from(&floor.name);
            }
            entry
                .rooms
                .extend(floor.rooms.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    /// Number of datapoints across all devices
    #[must_use]
    pub fn datapoint_count(&self) -> usize {
        self.devices
            .values()
            .flat_map(|d| d.channels.values())
            .map(|c| c.datapoints.len())
            .sum()
    }
}

fn merge_field(target: &mut Option<String>, update: Option<&str>) {
    if let Some(value) = update {
        *target = Some(value.to_string());
    }
}
