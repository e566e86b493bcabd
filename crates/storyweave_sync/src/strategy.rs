//! The sync strategy seam.

use crate::error::SyncResult;
use crate::host::SyncHost;
use std::time::Instant;
use storyweave_protocol::{ClientMessage, ServerMessage};

/// Outbound messages produced by a strategy during one engine call.
///
/// Strategies never touch the transport or the secure channel; they push
/// application messages here and the connection manager seals and sends
/// them afterwards. That keeps the strategies pure state machines.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<ClientMessage>,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message for sending.
    pub fn push(&mut self, message: ClientMessage) {
        self.messages.push(message);
    }

    /// Drains the queued messages in order.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.messages)
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A reconciliation strategy.
///
/// Both the optimistic client and the CRDT client implement this; the
/// connection manager selects one at connect time and nothing else
/// branches on which one is running.
pub trait SyncStrategy {
    /// Queues the subscribe message. Called once application-layer auth
    /// has completed.
    fn subscribe(&mut self, out: &mut Outbox);

    /// Handles one decoded message from the peer.
    fn handle_message(
        &mut self,
        message: ServerMessage,
        now: Instant,
        host: &dyn SyncHost,
        out: &mut Outbox,
    ) -> SyncResult<()>;

    /// Notes that local state changed; the actual flush is debounced.
    fn mark_dirty(&mut self, now: Instant);

    /// Drives the debounce and dirty-poll timers.
    fn tick(&mut self, now: Instant, host: &dyn SyncHost, out: &mut Outbox) -> SyncResult<()>;

    /// Forces a full flush immediately, bypassing the debounce (used on
    /// shutdown and manual save).
    fn flush_now(&mut self, host: &dyn SyncHost, out: &mut Outbox) -> SyncResult<()>;

    /// Discards all session state after a disconnect. A fresh subscribe
    /// re-seeds everything from the peer.
    fn reset(&mut self);

    /// Returns true once the subscribe reply has been processed.
    fn is_subscribed(&self) -> bool;
}
