//! # Point-in-time snapshots for external reporting.
//!
//! A [`View`] is copied out of the tree while the locks are held and carries no
//! references back into it, so it can be serialized (or held) for as long as the
//! caller likes without blocking registration or reconciliation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a whole tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    /// Nodes in registration order.
    pub nodes: Vec<NodeView>,
}

impl View {
    /// Looks a node up by key.
    pub fn node(&self, name: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Snapshot of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: u64,
    pub name: String,
    pub hash: String,
    /// Keys of nodes imported by this node's script.
    pub links: Vec<String>,
    /// `"local"` or `"remote"`.
    pub origin: String,
    pub dialect: String,
    pub status: String,
    /// A wakeup pass is in progress.
    pub waking: bool,
    /// When the node last entered `running`.
    pub since: Option<DateTime<Utc>>,
    /// Seconds spent in `running` so far (0 otherwise).
    pub uptime: u64,
    pub failed: bool,
    pub cause: Option<String>,
    pub children: Vec<ChildView>,
}

/// Snapshot of one child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub from: String,
    pub private: bool,
    pub cause: Option<String>,
    pub reloads: u32,
    pub metadata: BTreeMap<String, String>,
}
