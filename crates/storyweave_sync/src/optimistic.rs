//! Optimistic diff/ops reconciliation.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::host::SyncHost;
use crate::strategy::{Outbox, SyncStrategy};
use crate::timer::{DebounceTimer, IntervalTimer};
use std::time::Instant;
use storyweave_codec::{content_hash, Value};
use storyweave_protocol::{apply_ops, diff_states, hash_ops, ClientMessage, Operation, ServerMessage};
use tracing::{debug, warn};

/// The single outstanding op batch awaiting acknowledgment.
#[derive(Debug, Clone)]
struct InflightBatch {
    ops: Vec<Operation>,
    hash: String,
    base_revision: u64,
    /// Set for batches sent by a forced flush; those get exactly one
    /// rebase-and-retry before giving up.
    forced: bool,
}

/// Diff/ops reconciliation with server-assigned revisions.
///
/// Keeps three trees:
/// - **baseline** — last state acknowledged by the peer
/// - **shadow** — baseline plus optimistically applied local batches;
///   what the UI reflects and what local diffs are computed against
/// - the **in-flight batch** — at most one at a time; further local
///   dirtiness is deferred until it resolves by ack, echo, or conflict
///
/// Policy note: a non-echo broadcast is applied to both baseline and
/// shadow even while a local batch is in flight (accept-remote-first).
/// At whole-entity granularity the two concurrent writes can reorder;
/// the conflict rebase restores local intent when the peer rejects the
/// in-flight batch.
pub struct OptimisticSync {
    game_id: String,
    subscribed: bool,
    revision: u64,
    baseline: Value,
    shadow: Value,
    inflight: Option<InflightBatch>,
    dirty: bool,
    /// Waiting for the fresh snapshot that answers a conflict.
    rebasing: bool,
    /// The pending rebase belongs to a forced flush.
    rebase_forced: bool,
    /// The forced flush already used its one rebase.
    forced_rebase_used: bool,
    debounce: DebounceTimer,
    poll: IntervalTimer,
    last_local_hash: String,
}

impl OptimisticSync {
    /// Creates the strategy from the connection config.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            game_id: config.game_id.clone(),
            subscribed: false,
            revision: 0,
            baseline: Value::empty_map(),
            shadow: Value::empty_map(),
            inflight: None,
            dirty: false,
            rebasing: false,
            rebase_forced: false,
            forced_rebase_used: false,
            debounce: DebounceTimer::new(config.debounce_window),
            poll: IntervalTimer::new(config.poll_interval),
            last_local_hash: String::new(),
        }
    }

    /// The last acknowledged revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The last acknowledged state.
    pub fn baseline(&self) -> &Value {
        &self.baseline
    }

    /// Baseline plus unconfirmed local edits.
    pub fn shadow(&self) -> &Value {
        &self.shadow
    }

    /// Returns true while a batch awaits acknowledgment.
    pub fn has_inflight(&self) -> bool {
        self.inflight.is_some()
    }

    fn seed(&mut self, state: Value, revision: u64, now: Instant, host: &dyn SyncHost) {
        self.baseline = state;
        self.shadow = self.baseline.clone();
        self.revision = revision;
        self.inflight = None;
        self.subscribed = true;
        self.last_local_hash = content_hash(&self.shadow);
        self.poll.start(now);
        debug!(revision, "subscribed with snapshot");
        host.status("Sync active.");
        host.state_replaced(&self.shadow, self.revision);
    }

    fn rebase(&mut self, snapshot: Value, revision: u64, host: &dyn SyncHost, out: &mut Outbox) -> SyncResult<()> {
        self.rebasing = false;

        // Reapply genuinely-local work on top of the fresh baseline, so
        // the UI does not eat the user's unconfirmed edits.
        let local = host.current_state();
        let reapply = diff_states(&snapshot, &local);

        self.baseline = snapshot;
        self.shadow = self.baseline.clone();
        apply_ops(&mut self.shadow, &reapply)?;
        self.revision = revision;
        self.last_local_hash = content_hash(&self.shadow);

        debug!(revision, reapply = reapply.len(), "rebased onto fresh snapshot");
        host.state_replaced(&self.shadow, self.revision);

        if reapply.is_empty() {
            self.rebase_forced = false;
        } else {
            let forced = self.rebase_forced;
            self.rebase_forced = false;
            self.queue_batch(reapply, forced, out);
        }
        Ok(())
    }

    /// Installs `ops` as the in-flight batch, folds it into the shadow,
    /// and queues the wire event.
    fn queue_batch(&mut self, ops: Vec<Operation>, forced: bool, out: &mut Outbox) {
        debug_assert!(!ops.is_empty());
        self.inflight = Some(InflightBatch {
            hash: hash_ops(&ops),
            base_revision: self.revision,
            ops: ops.clone(),
            forced,
        });
        // Optimistically fold into the shadow: the next local diff must
        // be computed on top of what is already on the wire.
        if let Err(e) = apply_ops(&mut self.shadow, &ops) {
            // Ops produced by our own diff engine always apply.
            warn!(error = %e, "local batch failed to apply to shadow");
        }
        out.push(ClientMessage::Event {
            base_revision: self.revision,
            ops,
        });
    }

    fn flush_if_needed(&mut self, now: Instant, host: &dyn SyncHost, out: &mut Outbox) {
        if !self.dirty || !self.subscribed || self.rebasing {
            return;
        }
        if self.inflight.is_some() {
            // Wait for ack/echo/conflict, then try again.
            self.debounce.arm(now);
            return;
        }

        let current = host.current_state();
        let ops = diff_states(&self.shadow, &current);
        self.dirty = false;
        if ops.is_empty() {
            return;
        }
        debug!(ops = ops.len(), base_revision = self.revision, "flushing local edits");
        self.queue_batch(ops, false, out);
    }

    fn is_echo(&self, ops_hash: &str, base_revision: u64) -> bool {
        self.inflight
            .as_ref()
            .map(|batch| batch.hash == ops_hash && batch.base_revision == base_revision)
            .unwrap_or(false)
    }
}

impl SyncStrategy for OptimisticSync {
    fn subscribe(&mut self, out: &mut Outbox) {
        out.push(ClientMessage::Subscribe {
            game_id: self.game_id.clone(),
        });
    }

    fn handle_message(
        &mut self,
        message: ServerMessage,
        now: Instant,
        host: &dyn SyncHost,
        out: &mut Outbox,
    ) -> SyncResult<()> {
        match message {
            ServerMessage::Subscribed { state, revision } => {
                if self.rebasing {
                    self.rebase(state, revision, host, out)?;
                } else {
                    self.seed(state, revision, now, host);
                }
                Ok(())
            }

            ServerMessage::Ack { new_revision } => {
                if let Some(batch) = self.inflight.take() {
                    // Commit the optimistic batch into the authoritative
                    // baseline and collapse any drift.
                    apply_ops(&mut self.baseline, &batch.ops)?;
                    self.revision = new_revision;
                    self.shadow = self.baseline.clone();
                    debug!(new_revision, "in-flight batch acknowledged");
                    if self.dirty {
                        self.debounce.arm(now);
                    }
                } else {
                    self.revision = self.revision.max(new_revision);
                }
                Ok(())
            }

            ServerMessage::Event {
                ops,
                base_revision,
                new_revision,
            } => {
                if self.is_echo(&hash_ops(&ops), base_revision) {
                    // Our own batch coming back: commit to baseline, do
                    // not double-apply into the shadow.
                    apply_ops(&mut self.baseline, &ops)?;
                    self.revision = new_revision;
                    self.shadow = self.baseline.clone();
                    self.inflight = None;
                    debug!(new_revision, "in-flight batch echoed back");
                    if self.dirty {
                        self.debounce.arm(now);
                    }
                    return Ok(());
                }

                apply_ops(&mut self.baseline, &ops)?;
                apply_ops(&mut self.shadow, &ops)?;
                self.revision = new_revision;
                self.last_local_hash = content_hash(&self.shadow);
                debug!(new_revision, ops = ops.len(), "remote event applied");
                host.remote_delta_applied();
                Ok(())
            }

            ServerMessage::Conflict => {
                let forced = self
                    .inflight
                    .as_ref()
                    .map(|batch| batch.forced)
                    .unwrap_or(false);
                // The peer's rejection is authoritative: never retry the
                // same batch.
                self.inflight = None;

                if forced && self.forced_rebase_used {
                    host.error("Save failed: conflict persisted after rebase.");
                    return Err(SyncError::RebaseFailed);
                }
                if forced {
                    self.forced_rebase_used = true;
                    self.rebase_forced = true;
                } else {
                    self.rebase_forced = false;
                }

                warn!(revision = self.revision, "batch rejected, rebasing");
                host.status("Revision conflict. Rebasing local edits…");
                self.rebasing = true;
                out.push(ClientMessage::Subscribe {
                    game_id: self.game_id.clone(),
                });
                Ok(())
            }

            ServerMessage::Error { detail } => {
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
        self.dirty = true;
        self.debounce.arm(now);
    }

    fn tick(&mut self, now: Instant, host: &dyn SyncHost, out: &mut Outbox) -> SyncResult<()> {
        // Due flushes go first; a poll firing in the same tick re-arms
        // the debounce and must not postpone them.
        if self.debounce.fire(now) {
            self.flush_if_needed(now, host, out);
        }
        if self.subscribed && self.poll.tick(now) {
            // Passive change detector: catches edits even if the UI
            // forgot to call mark_dirty.
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
        self.forced_rebase_used = false;
        self.dirty = false;
        self.debounce.cancel();

        let current = host.current_state();
        let ops = diff_states(&self.shadow, &current);
        if ops.is_empty() {
            return Ok(());
        }
        if self.inflight.is_some() {
            // Shutdown-only escape hatch: the replaced batch's echo will
            // look like a remote event, which is harmless at teardown.
            warn!("forced flush replacing an in-flight batch");
        }
        self.queue_batch(ops, true, out);
        Ok(())
    }

    fn reset(&mut self) {
        self.subscribed = false;
        self.revision = 0;
        self.baseline = Value::empty_map();
        self.shadow = Value::empty_map();
        self.inflight = None;
        self.dirty = false;
        self.rebasing = false;
        self.rebase_forced = false;
        self.forced_rebase_used = false;
        self.debounce.cancel();
        self.poll.stop();
        self.last_local_hash.clear();
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}
