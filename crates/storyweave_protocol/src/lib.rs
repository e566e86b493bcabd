//! # StoryWeaver Sync Protocol
//!
//! Sync operations, state diffing, and wire messages for StoryWeaver.
//!
//! This crate provides:
//! - [`Operation`] — the replicated change unit
//! - [`diff_states`] — minimal op list transforming one state into another
//! - [`apply_ops`] — op application with the shared path-walk semantics
//! - Wire messages (channel frames and application messages)
//! - The fixed project schema constants (collections, rich-text fields)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod diff;
mod error;
mod messages;
mod operation;
mod schema;

pub use apply::apply_ops;
pub use diff::diff_states;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ChannelFrame, ClientMessage, Role, ServerMessage};
pub use operation::{hash_ops, Operation};
pub use schema::{
    is_collection, is_text_field, COLLECTIONS, CUSTOM_TITLES_KEY, SCHEMA_VERSION,
    SCHEMA_VERSION_KEY, TEXT_FIELDS,
};
