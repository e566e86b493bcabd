//! Error types for the sync engine.

use storyweave_channel::ChannelError;
use storyweave_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization.
///
/// The taxonomy drives recovery behavior:
/// - transport errors surface as status text and wait for an explicit
///   resubscribe
/// - protocol errors are fatal for the batch being applied
/// - cryptographic errors are always fatal to the connection
/// - configuration errors are fatal at startup of the sync attempt
///
/// Revision conflicts are *not* errors; they are recovered automatically
/// by the rebase protocol and never surface to the end user.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error (connection drop, malformed frame).
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// Protocol error while decoding or applying a batch.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Cryptographic failure (MAC, AEAD, sequence).
    #[error("secure channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {message}")]
    Config {
        /// What is missing or wrong.
        message: String,
    },

    /// The peer reported an error for the current operation.
    #[error("server error: {detail}")]
    Server {
        /// Peer-provided detail.
        detail: String,
    },

    /// A forced flush conflicted twice; the second failure is not
    /// retried.
    #[error("rebase failed: conflict persisted after retry")]
    RebaseFailed,

    /// An operation required an active subscription.
    #[error("not subscribed")]
    NotSubscribed,
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error must terminate the connection.
    ///
    /// Cryptographic and configuration failures stop synchronization
    /// entirely until corrected; everything else degrades to a status
    /// message and an eventual resubscribe.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Channel(_) | SyncError::Config { .. })
    }
}
