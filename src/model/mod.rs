//! In-memory device tree and its XML projections

mod parser;
mod snapshot;
mod tree;


pub use parser::{SCENE_PREFIX, parse_master, parse_update};
pub use snapshot::{DeviceModel, LookupError, Snapshot, SnapshotQuery};
pub use tree::{Channel, Device, DeviceTree, Floor};

use crate::protocol::xml::XmlError;
use thiserror::Error;

/// Errors while projecting XML onto the tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Underlying XML problem
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// Master document lacks a required section
    #[error("master data lacks <{0}>")]
    MissingSection(&'static str),

    /// Update fragment root is not `type="update"`
    #[error("not an update document")]
    NotAnUpdate,
}
