//! Sync operations.

use serde::{Deserialize, Serialize};
use storyweave_codec::{content_hash, Value};

/// A single replicated change to the project state tree.
///
/// Operations travel in ordered batches. The wire form is an internally
/// tagged JSON object (`{"op": "set", ...}`); an unrecognized tag fails
/// deserialization of the whole batch before anything is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Replaces the value at a dot-joined path, creating intermediate
    /// mappings as needed.
    Set {
        /// Dot-joined key sequence from the state root.
        path: String,
        /// The new value.
        value: Value,
    },
    /// Removes the leaf at a dot-joined path. No-op if absent.
    Delete {
        /// Dot-joined key sequence from the state root.
        path: String,
    },
    /// Inserts or fully replaces one entity record.
    UpsertEntity {
        /// Collection name.
        collection: String,
        /// Entity id within the collection.
        id: String,
        /// The complete entity record.
        value: Value,
    },
    /// Marks an entity as soft-deleted without removing it.
    SoftDeleteEntity {
        /// Collection name.
        collection: String,
        /// Entity id within the collection.
        id: String,
    },
}

impl Operation {
    /// Creates a `set` operation.
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Operation::Set {
            path: path.into(),
            value,
        }
    }

    /// Creates a `delete` operation.
    pub fn delete(path: impl Into<String>) -> Self {
        Operation::Delete { path: path.into() }
    }

    /// Creates an `upsert_entity` operation.
    pub fn upsert(collection: impl Into<String>, id: impl Into<String>, value: Value) -> Self {
        Operation::UpsertEntity {
            collection: collection.into(),
            id: id.into(),
            value,
        }
    }

    /// Creates a `soft_delete_entity` operation.
    pub fn soft_delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Operation::SoftDeleteEntity {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Converts this operation into its wire-shaped [`Value`] tree.
    pub fn to_value(&self) -> Value {
        match self {
            Operation::Set { path, value } => Value::object(vec![
                ("op", Value::from("set")),
                ("path", Value::from(path.as_str())),
                ("value", value.clone()),
            ]),
            Operation::Delete { path } => Value::object(vec![
                ("op", Value::from("delete")),
                ("path", Value::from(path.as_str())),
            ]),
            Operation::UpsertEntity {
                collection,
                id,
                value,
            } => Value::object(vec![
                ("op", Value::from("upsert_entity")),
                ("collection", Value::from(collection.as_str())),
                ("id", Value::from(id.as_str())),
                ("value", value.clone()),
            ]),
            Operation::SoftDeleteEntity { collection, id } => Value::object(vec![
                ("op", Value::from("soft_delete_entity")),
                ("collection", Value::from(collection.as_str())),
                ("id", Value::from(id.as_str())),
            ]),
        }
    }
}

/// Computes the content hash of an operation batch.
///
/// The in-flight echo check compares this hash (together with the base
/// revision) against broadcast events to recognize the client's own batch
/// coming back from the peer.
pub fn hash_ops(ops: &[Operation]) -> String {
    let tree = Value::Array(ops.iter().map(Operation::to_value).collect());
    content_hash(&tree)
}
