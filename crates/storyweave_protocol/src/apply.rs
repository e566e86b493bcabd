//! Op application.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use storyweave_codec::Value;

/// Applies an ordered op batch to a state tree, left to right.
///
/// Each op's effect is visible to the ops after it. There is **no**
/// batch-level rollback: a malformed op aborts with an error and leaves
/// the ops before it already applied. Decode-time validation keeps
/// structurally invalid batches out, so in practice the only mid-batch
/// failure is an empty path.
///
/// Path walks are destructive: an intermediate segment that does not
/// already resolve to a mapping is overwritten with a fresh empty mapping.
/// Callers supplying conflicting non-mapping values at interior paths will
/// lose them — intentional, but worth knowing.
pub fn apply_ops(state: &mut Value, ops: &[Operation]) -> ProtocolResult<()> {
    if !state.is_map() {
        *state = Value::empty_map();
    }
    for op in ops {
        match op {
            Operation::Set { path, value } => set_path(state, path, value.clone())?,
            Operation::Delete { path } => delete_path(state, path),
            Operation::UpsertEntity {
                collection,
                id,
                value,
            } => {
                let map = state.as_map_mut().expect("state root is a map");
                let entities = map
                    .entry(collection.clone())
                    .or_insert_with(Value::empty_map);
                if !entities.is_map() {
                    *entities = Value::empty_map();
                }
                entities
                    .as_map_mut()
                    .expect("collection is a map")
                    .insert(id.clone(), value.clone());
            }
            Operation::SoftDeleteEntity { collection, id } => {
                soft_delete(state, collection, id);
            }
        }
    }
    Ok(())
}

fn set_path(state: &mut Value, path: &str, value: Value) -> ProtocolResult<()> {
    let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
    let Some((leaf, parents)) = parts.split_last() else {
        return Err(ProtocolError::EmptyPath);
    };

    let mut current = state;
    for part in parents {
        let map = current.as_map_mut().expect("walked node is a map");
        let next = map.entry((*part).to_string()).or_insert_with(Value::empty_map);
        if !next.is_map() {
            *next = Value::empty_map();
        }
        current = next;
    }
    current
        .as_map_mut()
        .expect("walked node is a map")
        .insert((*leaf).to_string(), value);
    Ok(())
}

fn delete_path(state: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
    let Some((leaf, parents)) = parts.split_last() else {
        return;
    };

    let mut current = state;
    for part in parents {
        let Some(next) = current.as_map_mut().and_then(|m| m.get_mut(*part)) else {
            return;
        };
        current = next;
    }
    if let Some(map) = current.as_map_mut() {
        map.remove(*leaf);
    }
}

fn soft_delete(state: &mut Value, collection: &str, id: &str) {
    let Some(entity) = state
        .as_map_mut()
        .and_then(|m| m.get_mut(collection))
        .and_then(Value::as_map_mut)
        .and_then(|entities| entities.get_mut(id))
        .and_then(Value::as_map_mut)
    else {
        return;
    };
    entity.insert("is_deleted".to_string(), Value::Bool(true));
    if let Some(meta) = entity.get_mut("meta").and_then(Value::as_map_mut) {
        meta.insert("is_deleted".to_string(), Value::Bool(true));
    }
}
