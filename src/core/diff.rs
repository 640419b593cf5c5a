//! # Diff payloads delivered by an external transport.
//!
//! ```json
//! {
//!   "removes": [7],
//!   "updates": [{ "id": 1, "name": "ingest", "hash": "…", "dialect": "lua", "chunk": "…" }]
//! }
//! ```
//!
//! Every field is optional on the wire. An empty diff is a status request.

use serde::{Deserialize, Serialize};

/// Batch of removals and upserts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diff {
    /// Ids of nodes to remove.
    pub removes: Vec<u64>,
    /// Nodes to register or update.
    pub updates: Vec<DiffUpdate>,
}

impl Diff {
    /// Whether the diff changes nothing.
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty() && self.updates.is_empty()
    }
}

/// One upsert of a [`Diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffUpdate {
    /// Node id (`0` derives one from the name).
    pub id: u64,
    /// Node key.
    pub name: String,
    /// Content hash; an update whose hash matches the registered node is skipped.
    pub hash: String,
    /// Script dialect.
    pub dialect: String,
    /// Script source.
    pub chunk: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_payload_decodes() {
        let diff: Diff =
            serde_json::from_str(r#"{"updates":[{"id":1,"name":"n","chunk":"ok-script"}]}"#)
                .unwrap();
        assert!(diff.removes.is_empty());
        assert_eq!(diff.updates.len(), 1);
        assert_eq!(diff.updates[0].name, "n");
        assert!(diff.updates[0].hash.is_empty());

        let empty: Diff = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
