//! Worker node inventory and placement.
//!
//! Nodes are never persisted. Every selection reads a live (possibly stale)
//! listing from the fleet manager and picks from it round-robin.

mod error;
mod fanout;
mod inventory;
mod selector;

pub use error::{NodeError, NodeResult};
pub use fanout::for_each_node;
pub use inventory::{FleetConfig, FleetInventory, NodeInventory};
pub use selector::NodeSelector;

use serde::{Deserialize, Serialize};

/// Scheduling availability reported by the fleet manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAvailability {
    Active,
    Pause,
    Drain,
    #[serde(untagged)]
    Other(String),
}

impl NodeAvailability {
    pub fn is_active(&self) -> bool {
        matches!(self, NodeAvailability::Active)
    }
}

impl std::fmt::Display for NodeAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeAvailability::Active => write!(f, "active"),
            NodeAvailability::Pause => write!(f, "pause"),
            NodeAvailability::Drain => write!(f, "drain"),
            NodeAvailability::Other(other) => write!(f, "{}", other),
        }
    }
}

impl std::str::FromStr for NodeAvailability {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "active" => NodeAvailability::Active,
            "pause" => NodeAvailability::Pause,
            "drain" => NodeAvailability::Drain,
            other => NodeAvailability::Other(other.to_string()),
        })
    }
}

/// A fleet host able to run session instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerNode {
    /// Hostname, also used as the remote-shell target and in placement constraints.
    pub hostname: String,
    /// Node ID assigned by the fleet manager.
    pub cluster_id: String,
    pub availability: NodeAvailability,
}
