//! # StoryWeaver Sync Engine
//!
//! Realtime state synchronization engine for StoryWeaver.
//!
//! This crate provides:
//! - Optimistic diff/ops reconciliation with conflict rebase
//! - CRDT reconciliation over a converging replicated document
//!   (`crdt` feature)
//! - Debounced flushes with a dirty-poll fallback
//! - Connection lifecycle over the encrypted channel
//!
//! ## Architecture
//!
//! The engine is **sans-IO and single-threaded**: the surrounding event
//! loop owns the network and the clock, and calls into the
//! [`ConnectionManager`] with inbound frames, timer ticks, and edit
//! notifications. Handlers run to completion, so none of the shared
//! state (baseline/shadow/in-flight, the replicated document, sequence
//! counters) needs locking. Strategies never touch the transport; they
//! queue messages which the manager seals and sends.
//!
//! ## Key Invariants
//!
//! - At most one optimistic batch is in flight at a time
//! - A server rejection discards the batch; recovery rebases onto a
//!   fresh snapshot
//! - Cryptographic failures close the connection; nothing is retried
//! - Disconnect discards all session state; subscribe re-seeds it

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
#[cfg(feature = "crdt")]
mod crdt;
mod error;
mod host;
mod optimistic;
mod strategy;
mod timer;
mod transport;

pub use config::{SyncConfig, SyncMode};
pub use connection::{ConnectionManager, ConnectionPhase};
#[cfg(feature = "crdt")]
pub use crdt::CrdtSync;
pub use error::{SyncError, SyncResult};
pub use host::{RecordingHost, SyncHost};
pub use optimistic::OptimisticSync;
pub use strategy::{Outbox, SyncStrategy};
pub use timer::{DebounceTimer, IntervalTimer};
pub use transport::{MessageTransport, MockTransport};
