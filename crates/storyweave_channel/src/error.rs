//! Error types for the secure channel.

use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors raised by the handshake or the frame layer.
///
/// All of these are fatal to the connection: they indicate either a bug
/// or tampering, and the channel must close rather than attempt recovery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer's handshake MAC did not verify.
    #[error("peer handshake MAC verification failed")]
    BadPeerMac,

    /// The client's handshake MAC did not verify (responder side).
    #[error("client handshake MAC verification failed")]
    BadClientMac,

    /// The offered key id does not match the responder's secret.
    #[error("unknown key id")]
    UnknownKeyId,

    /// AEAD authentication failed while opening a frame.
    #[error("frame authentication failed")]
    OpenFailed,

    /// AEAD sealing failed.
    #[error("frame sealing failed")]
    SealFailed,

    /// A frame arrived out of sequence.
    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch {
        /// The receive counter's expected value.
        expected: u64,
        /// The sequence number the frame declared.
        got: u64,
    },

    /// A base64 field failed to decode.
    #[error("invalid base64 field: {field}")]
    InvalidEncoding {
        /// Which field was malformed.
        field: &'static str,
    },
}
