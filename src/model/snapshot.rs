use super::tree::{Channel, Device, DeviceTree};
use serde::Serialize;
use thiserror::Error;

/// Why a snapshot query found nothing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Master data has not arrived yet
    #[error("device data requested before master data was received")]
    NotInitialized,

    /// A channel or datapoint was given without its parent
    #[error("invalid query: {0}")]
    InvalidQuery(&'static str),

    /// No device with this serial number
    #[error("unknown device '{serial}'")]
    UnknownDevice {
        /// Serial number
        serial: String,
    },

    /// Device exists but lacks the channel
    #[error("unknown channel '{serial}/{channel}'")]
    UnknownChannel {
        /// Serial number
        serial: String,
        /// Channel id
        channel: String,
    },

    /// Channel exists but lacks the datapoint
    #[error("unknown datapoint '{serial}/{channel}/{datapoint}'")]
    UnknownDatapoint {
        /// Serial number
        serial: String,
        /// Channel id
        channel: String,
        /// Datapoint id
        datapoint: String,
    },
}

/// What part of the tree to return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotQuery {
    /// Whole tree
    All,
    /// One device
    Device {
        /// Serial number
        serial: String,
    },
    /// One channel
    Channel {
        /// Serial number
        serial: String,
        /// Channel id
        channel: String,
    },
    /// One datapoint value
    Datapoint {
        /// Serial number
        serial: String,
        /// Channel id
        channel: String,
        /// Datapoint id
        datapoint: String,
    },
}

impl SnapshotQuery {
    /// Build a query from optional path segments
    ///
    /// # Errors
    ///
    /// Returns error if a segment is given without the one before it
    pub fn from_parts(
        serial: Option<&str>,
        channel: Option<&str>,
        datapoint: Option<&str>,
    ) -> Result<Self, LookupError> {
        match (serial, channel, datapoint) {
            (None, None, None) => Ok(Self::All),
            (Some(serial), None, None) => Ok(Self::Device {
                serial: serial.to_string(),
            }),
            (Some(serial), Some(channel), None) => Ok(Self::Channel {
                serial: serial.to_string(),
                channel: channel.to_string(),
            }),
            (Some(serial), Some(channel), Some(datapoint)) => Ok(Self::Datapoint {
                serial: serial.to_string(),
                channel: channel.to_string(),
                datapoint: datapoint.to_string(),
            }),
            (None, _, _) => Err(LookupError::InvalidQuery("serial number required")),
            (Some(_), None, Some(_)) => Err(LookupError::InvalidQuery("channel required")),
        }
    }
}

/// Result of a snapshot query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    /// Whole tree
    Tree(DeviceTree),
    /// One device
    Device(Device),
    /// One channel
    Channel(Channel),
    /// One datapoint value, possibly empty
    Datapoint(String),
}

/// The device tree plus its initialisation state
///
/// Master data replaces the tree; updates are merged into it.
#[derive(Debug, Clone, Default)]
pub struct DeviceModel {
    tree: DeviceTree,
    initialized: bool,
}

impl DeviceModel {
    /// Empty, uninitialised model
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once master data has been applied
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current tree, regardless of initialisation
    #[must_use]
    pub fn tree(&self) -> &DeviceTree {
        &self.tree
    }

    /// Install a freshly parsed master tree
    pub fn replace(&mut self, master: DeviceTree) {
        self.tree = master;
        self.initialized = true;
    }

    /// Merge an incremental update
    pub fn merge(&mut self, update: &DeviceTree) {
        self.tree.merge(update);
    }

    /// Forget everything, as after a disconnect
    pub fn clear(&mut self) {
        self.tree = DeviceTree::new();
        self.initialized = false;
    }

    /// Answer a snapshot query
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NotInitialized`] before master data arrived,
    /// or the first missing path segment
    pub fn query(&self, query: &SnapshotQuery) -> Result<Snapshot, LookupError> {
        if !self.initialized {
            return Err(LookupError::NotInitialized);
        }

        let device = |serial: &str| {
            self.tree
                .device(serial)
                .ok_or_else(|| LookupError::UnknownDevice {
                    serial: serial.to_string(),
                })
        };
        let channel = |serial: &str, channel: &str| {
            device(serial)?
                .channels
                .get(channel)
                .ok_or_else(|| LookupError::UnknownChannel {
                    serial: serial.to_string(),
                    channel: channel.to_string(),
                })
        };

        match query {
            SnapshotQuery::All => Ok(Snapshot::Tree(self.tree.clone())),
            SnapshotQuery::Device { serial } => Ok(Snapshot::Device(device(serial)?.clone())),
            SnapshotQuery::Channel {
                serial,
                channel: id,
            } => Ok(Snapshot::Channel(channel(serial, id)?.clone())),
            SnapshotQuery::Datapoint {
                serial,
                channel: id,
                datapoint,
            } => channel(serial, id)?
                .datapoint(datapoint)
                .map(|value| Snapshot::Datapoint(value.to_string()))
                .ok_or_else(|| LookupError::UnknownDatapoint {
                    serial: serial.clone(),
                    channel: id.clone(),
                    datapoint: datapoint.clone(),
                }),
        }
    }
}
