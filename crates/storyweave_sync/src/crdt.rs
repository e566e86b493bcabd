//! CRDT reconciliation over a converging replicated document.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::host::SyncHost;
use crate::strategy::{Outbox, SyncStrategy};
use crate::timer::{DebounceTimer, IntervalTimer};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::collections::HashMap;
use std::time::Instant;
use storyweave_codec::{content_hash, from_json_str, to_canonical_json, Value};
use storyweave_protocol::{
    diff_states, is_collection, is_text_field, ClientMessage, Operation, Role, ServerMessage,
    COLLECTIONS,
};
use tracing::{debug, warn};
use yrs::types::Value as YrsValue;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Doc, GetString, Map, MapPrelim, MapRef, ReadTxn, StateVector, Text, TextPrelim, TextRef,
    Transact, TransactionMut, Update, WriteTxn,
};

/// Name of the document's root map.
const ROOT: &str = "root";

/// CRDT reconciliation strategy.
///
/// Shares the diff engine with the optimistic client: local edits become
/// ops, and the ops are replayed against the replicated document instead
/// of the wire. Rich-text fields become sequence CRDTs (concurrent edits
/// to the same description converge character-by-character); scalar
/// fields are last-writer-wins map entries; composite values are stored
/// as canonical-JSON strings and accept last-writer-wins semantics.
///
/// Instead of revisions, replicas exchange state vectors: `subscribe`
/// announces what this replica has, the peer answers with one catch-up
/// delta, and every local flush sends the increment since the last-sent
/// vector. Remote updates merge commutatively and the whole document is
/// exported back to the canonical tree for the host.
pub struct CrdtSync {
    game_id: String,
    doc: Doc,
    subscribed: bool,
    role: Option<Role>,
    /// Echo suppression: while a remote update is being merged, local
    /// change detection is ignored so the peer's own update is not
    /// reflected back as a fresh local edit.
    applying_remote: bool,
    /// Exported snapshot the next local diff is computed against.
    last_snapshot: Value,
    /// Everything up to this vector has been sent (or was received).
    last_sent_sv: StateVector,
    /// The peer's vector from the latest ack, for observability.
    last_server_sv: Option<Vec<u8>>,
    dirty: bool,
    debounce: DebounceTimer,
    poll: IntervalTimer,
    last_local_hash: String,
}

impl CrdtSync {
    /// Creates the strategy from the connection config.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            game_id: config.game_id.clone(),
            doc: Doc::new(),
            subscribed: false,
            role: None,
            applying_remote: false,
            last_snapshot: Value::empty_map(),
            last_sent_sv: StateVector::default(),
            last_server_sv: None,
            dirty: false,
            debounce: DebounceTimer::new(config.debounce_window),
            poll: IntervalTimer::new(config.poll_interval),
            last_local_hash: String::new(),
        }
    }

    /// The role assigned by the peer, once subscribed.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The peer's state vector from the latest subscribe or ack.
    pub fn peer_state_vector(&self) -> Option<&[u8]> {
        self.last_server_sv.as_deref()
    }

    /// Exports the document into the canonical state tree.
    pub fn export_state(&self) -> Value {
        let txn = self.doc.transact();
        export_state(&txn)
    }

    fn apply_remote_update(
        &mut self,
        update_b64: &str,
        initial: bool,
        now: Instant,
        host: &dyn SyncHost,
    ) -> SyncResult<()> {
        self.applying_remote = true;
        let result = self.apply_remote_inner(update_b64, initial, now, host);
        self.applying_remote = false;
        result
    }

    fn apply_remote_inner(
        &mut self,
        update_b64: &str,
        initial: bool,
        now: Instant,
        host: &dyn SyncHost,
    ) -> SyncResult<()> {
        if !update_b64.is_empty() {
            let bytes = B64
                .decode(update_b64)
                .map_err(|_| SyncError::transport("update field is not valid base64"))?;
            let update = Update::decode_v1(&bytes)
                .map_err(|e| SyncError::transport(format!("undecodable CRDT update: {e}")))?;
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update);
        }

        let state = self.export_state();
        debug!(initial, "merged remote update");

        // Advance the sent vector past the merged content so the next
        // local flush carries only genuinely-local changes; this is the
        // send-side half of echo suppression.
        {
            let txn = self.doc.transact();
            self.last_sent_sv = txn.state_vector();
        }

        self.last_local_hash = content_hash(&state);
        self.last_snapshot = state.clone();

        if initial {
            self.subscribed = true;
            self.poll.start(now);
            host.status("CRDT sync active.");
            host.state_replaced(&state, 0);
        } else {
            host.remote_delta_applied();
        }
        Ok(())
    }

    fn flush_snapshot(&mut self, snapshot: Value, force: bool, out: &mut Outbox) -> SyncResult<()> {
        let base = if force {
            Value::empty_map()
        } else {
            self.last_snapshot.clone()
        };
        let ops = diff_states(&base, &snapshot);
        if ops.is_empty() {
            return Ok(());
        }

        {
            let mut txn = self.doc.transact_mut();
            let root = txn.get_or_insert_map(ROOT);
            apply_ops_to_doc(&mut txn, &root, &ops, &snapshot);
        }
        self.last_snapshot = snapshot;

        // Encode the increment since the last send and advance the
        // vector regardless of role, so a later promotion does not
        // replay stale history.
        let update = {
            let txn = self.doc.transact();
            let update = txn.encode_state_as_update_v1(&self.last_sent_sv);
            self.last_sent_sv = txn.state_vector();
            update
        };

        if self.role.map(Role::can_write).unwrap_or(true) {
            debug!(ops = ops.len(), update_len = update.len(), "sending CRDT update");
            out.push(ClientMessage::CrdtUpdate {
                game_id: self.game_id.clone(),
                update_b64: B64.encode(update),
            });
        } else {
            debug!("read-only role, suppressing outbound update");
        }
        Ok(())
    }

    fn flush_if_needed(&mut self, host: &dyn SyncHost, out: &mut Outbox) -> SyncResult<()> {
        if !self.dirty || !self.subscribed {
            return Ok(());
        }
        self.dirty = false;
        let snapshot = host.current_state();
        self.flush_snapshot(snapshot, false, out)
    }
}

impl SyncStrategy for CrdtSync {
    fn subscribe(&mut self, out: &mut Outbox) {
        let sv = {
            let txn = self.doc.transact();
            txn.state_vector().encode_v1()
        };
        out.push(ClientMessage::CrdtSubscribe {
            game_id: self.game_id.clone(),
            state_vector_b64: B64.encode(sv),
        });
    }

    fn handle_message(
        &mut self,
        message: ServerMessage,
        now: Instant,
        host: &dyn SyncHost,
        _out: &mut Outbox,
    ) -> SyncResult<()> {
        match message {
            ServerMessage::CrdtSubscribed {
                role,
                update_b64,
                state_vector_b64,
            } => {
                self.role = Some(role);
                if !state_vector_b64.is_empty() {
                    self.last_server_sv = B64.decode(&state_vector_b64).ok();
                }
                self.apply_remote_update(&update_b64, true, now, host)
            }

            ServerMessage::CrdtUpdate { update_b64 } => {
                self.apply_remote_update(&update_b64, false, now, host)
            }

            ServerMessage::CrdtAck { state_vector_b64 } => {
                self.last_server_sv = B64.decode(&state_vector_b64).ok();
                Ok(())
            }

            ServerMessage::Error { detail } => {
                self.subscribed = false;
                host.error(&detail);
                Ok(())
            }

            other => {
                debug!(?other, "ignoring message for inactive strategy");
                Ok(())
            }
        }
    }

    fn mark_dirty(&mut self, now: Instant) {
        if self.applying_remote {
            return;
        }
        self.dirty = true;
        self.debounce.arm(now);
    }

    fn tick(&mut self, now: Instant, host: &dyn SyncHost, out: &mut Outbox) -> SyncResult<()> {
        // Due flushes go first; a poll firing in the same tick re-arms
        // the debounce and must not postpone them.
        if self.debounce.fire(now) {
            self.flush_if_needed(host, out)?;
        }
        if self.subscribed && !self.applying_remote && self.poll.tick(now) {
            let hash = content_hash(&host.current_state());
            if hash != self.last_local_hash {
                self.last_local_hash = hash;
                self.mark_dirty(now);
            }
        }
        Ok(())
    }

    fn flush_now(&mut self, host: &dyn SyncHost, out: &mut Outbox) -> SyncResult<()> {
        if !self.subscribed {
            return Ok(());
        }
        self.dirty = false;
        self.debounce.cancel();
        let snapshot = host.current_state();
        self.flush_snapshot(snapshot, true, out)
    }

    fn reset(&mut self) {
        // Nothing persists across a disconnect: a fresh subscribe
        // re-seeds the whole document from the peer.
        self.doc = Doc::new();
        self.subscribed = false;
        self.role = None;
        self.applying_remote = false;
        self.last_snapshot = Value::empty_map();
        self.last_sent_sv = StateVector::default();
        self.last_server_sv = None;
        self.dirty = false;
        self.debounce.cancel();
        self.poll.stop();
        self.last_local_hash.clear();
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

/// Replays diff-engine ops against the document.
fn apply_ops_to_doc(txn: &mut TransactionMut<'_>, root: &MapRef, ops: &[Operation], snapshot: &Value) {
    for op in ops {
        match op {
            Operation::Set { path, value } => {
                if path.contains('.') {
                    debug!(path = %path, "skipping nested set in CRDT mode");
                    continue;
                }
                set_opaque(txn, root, path, value);
            }

            Operation::Delete { path } => {
                match path.split_once('.') {
                    Some((collection, id)) => {
                        if let Some(YrsValue::YMap(entities)) = root.get(txn, collection) {
                            entities.remove(txn, id);
                        }
                    }
                    None => {
                        root.remove(txn, path);
                    }
                }
            }

            Operation::UpsertEntity { collection, id, .. } => {
                // Prefer the snapshot's copy so later ops in the batch
                // see the final field values.
                let Some(entity) = snapshot
                    .get(collection)
                    .and_then(|c| c.get(id))
                    .and_then(Value::as_map)
                else {
                    continue;
                };

                let entities = get_or_create_map(txn, root, collection);
                let entity_map = get_or_create_map(txn, &entities, id);

                for (field, value) in entity {
                    if value.is_null() {
                        continue;
                    }
                    match value {
                        Value::Text(s) if is_text_field(field) => {
                            let text = get_or_create_text(txn, &entity_map, field);
                            splice_text(txn, &text, s);
                        }
                        Value::Bool(b) => {
                            entity_map.insert(txn, field.as_str(), Any::Bool(*b));
                        }
                        Value::Int(n) => {
                            entity_map.insert(txn, field.as_str(), Any::BigInt(*n));
                        }
                        Value::Float(f) => {
                            entity_map.insert(txn, field.as_str(), Any::Number(*f));
                        }
                        Value::Text(s) => {
                            entity_map.insert(txn, field.as_str(), Any::from(s.clone()));
                        }
                        composite => {
                            // Stored as an opaque scalar; accepts
                            // last-writer-wins for the whole value.
                            entity_map.insert(
                                txn,
                                field.as_str(),
                                Any::from(to_canonical_json(composite)),
                            );
                        }
                    }
                }
            }

            Operation::SoftDeleteEntity { collection, id } => {
                let Some(YrsValue::YMap(entities)) = root.get(txn, collection) else {
                    continue;
                };
                let Some(YrsValue::YMap(entity_map)) = entities.get(txn, id) else {
                    continue;
                };
                entity_map.insert(txn, "is_deleted", Any::Bool(true));
                // Mirror into the serialized meta block when present.
                if let Some(YrsValue::Any(Any::String(meta_json))) = entity_map.get(txn, "meta") {
                    if let Ok(mut meta) = from_json_str(&meta_json) {
                        if let Some(map) = meta.as_map_mut() {
                            map.insert("is_deleted".to_string(), Value::Bool(true));
                            entity_map.insert(txn, "meta", Any::from(to_canonical_json(&meta)));
                        }
                    }
                }
            }
        }
    }
}

fn set_opaque(txn: &mut TransactionMut<'_>, root: &MapRef, key: &str, value: &Value) {
    match value {
        Value::Bool(b) => {
            root.insert(txn, key, Any::Bool(*b));
        }
        Value::Int(n) => {
            root.insert(txn, key, Any::BigInt(*n));
        }
        Value::Float(f) => {
            root.insert(txn, key, Any::Number(*f));
        }
        Value::Text(s) => {
            root.insert(txn, key, Any::from(s.clone()));
        }
        composite => {
            root.insert(txn, key, Any::from(to_canonical_json(composite)));
        }
    }
}

fn get_or_create_map(txn: &mut TransactionMut<'_>, parent: &MapRef, key: &str) -> MapRef {
    match parent.get(txn, key) {
        Some(YrsValue::YMap(map)) => map,
        _ => parent.insert(txn, key, MapPrelim::from(HashMap::<String, Any>::new())),
    }
}

fn get_or_create_text(txn: &mut TransactionMut<'_>, parent: &MapRef, key: &str) -> TextRef {
    match parent.get(txn, key) {
        Some(YrsValue::YText(text)) => text,
        _ => parent.insert(txn, key, TextPrelim::new("")),
    }
}

/// Splices `new` into the text by replacing only the changed range.
///
/// Wholesale delete-and-insert would lose concurrent edits; keeping the
/// common prefix and suffix means two clients editing different parts of
/// the same description both survive the merge.
fn splice_text(txn: &mut TransactionMut<'_>, text: &TextRef, new: &str) {
    let current = text.get_string(txn);
    if current == new {
        return;
    }

    let prefix = common_prefix_len(&current, new);
    let suffix = common_suffix_len(&current[prefix..], &new[prefix..]);

    let remove_len = current.len() - prefix - suffix;
    if remove_len > 0 {
        text.remove_range(txn, prefix as u32, remove_len as u32);
    }
    let insert = &new[prefix..new.len() - suffix];
    if !insert.is_empty() {
        text.insert(txn, prefix as u32, insert);
    }
}

/// Byte length of the longest common prefix, aligned to char boundaries.
fn common_prefix_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            break;
        }
        len += ca.len_utf8();
    }
    len
}

/// Byte length of the longest common suffix, aligned to char boundaries.
fn common_suffix_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    for (ca, cb) in a.chars().rev().zip(b.chars().rev()) {
        if ca != cb {
            break;
        }
        len += ca.len_utf8();
    }
    len
}

/// Exports the whole document back into the canonical state tree.
fn export_state<T: ReadTxn>(txn: &T) -> Value {
    let mut out = Value::empty_map();
    let Some(root) = txn.get_map(ROOT) else {
        return out;
    };
    let map = out.as_map_mut().expect("freshly created map");

    for (key, value) in root.iter(txn) {
        if is_collection(key) {
            continue;
        }
        map.insert(key.to_string(), export_field(txn, value));
    }

    for collection in COLLECTIONS {
        let Some(YrsValue::YMap(entities)) = root.get(txn, collection) else {
            continue;
        };
        let mut exported = Value::empty_map();
        let exported_map = exported.as_map_mut().expect("freshly created map");
        for (id, entity) in entities.iter(txn) {
            let YrsValue::YMap(entity_map) = entity else {
                continue;
            };
            let mut record = Value::empty_map();
            let record_map = record.as_map_mut().expect("freshly created map");
            for (field, value) in entity_map.iter(txn) {
                record_map.insert(field.to_string(), export_field(txn, value));
            }
            exported_map.insert(id.to_string(), record);
        }
        map.insert(collection.to_string(), exported);
    }

    out
}

fn export_field<T: ReadTxn>(txn: &T, value: YrsValue) -> Value {
    match value {
        YrsValue::YText(text) => Value::Text(text.get_string(txn)),
        YrsValue::Any(any) => export_any(&any),
        other => {
            warn!(?other, "unexpected shared type in export");
            Value::Null
        }
    }
}

fn export_any(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(f) => Value::Float(*f),
        Any::BigInt(n) => Value::Int(*n),
        Any::String(s) => {
            // Composite values were stored as canonical JSON; rehydrate
            // anything that looks like one.
            let trimmed: &str = s;
            if (trimmed.starts_with('{') && trimmed.ends_with('}'))
                || (trimmed.starts_with('[') && trimmed.ends_with(']'))
            {
                if let Ok(parsed) = from_json_str(trimmed) {
                    return parsed;
                }
            }
            Value::Text(s.to_string())
        }
        _ => Value::Null,
    }
}
