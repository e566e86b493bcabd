//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or applying operation batches.
///
/// These are fatal for the batch being processed, never silently
/// swallowed: the caller decides whether the surrounding connection
/// survives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A message or op batch failed to decode.
    #[error("message decode failed: {message}")]
    Decode {
        /// Description of the decode error.
        message: String,
    },

    /// A `set` op had an empty path.
    #[error("operation path is empty")]
    EmptyPath,
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}
