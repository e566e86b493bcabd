//! # StoryWeaver Secure Channel
//!
//! Pre-shared-key handshake and sequenced AEAD framing for StoryWeaver
//! sync connections.
//!
//! This crate provides:
//! - PSK and session-key derivation (HKDF-SHA256)
//! - Mutual proof-of-possession handshake (HMAC-SHA256, both sides)
//! - ChaCha20-Poly1305 frame sealing with per-direction sequence counters
//!
//! ## Security model
//!
//! Both endpoints hold a long-lived shared secret (the activation key).
//! The handshake proves possession on both sides and mixes two fresh
//! 32-byte nonces into the session key, so recorded traffic cannot be
//! decrypted with a later-leaked session key. Frames carry their sequence
//! number in the clear and in the AEAD nonce; the receiver requires exact
//! sequence equality, which rejects replays *and* reordering *and* frame
//! loss — a gap forces a fresh handshake rather than silent desync.
//!
//! Every cryptographic failure here is fatal to the connection. Callers
//! must close and re-handshake, never retry.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod error;
mod handshake;
mod kdf;

pub use channel::SecureChannel;
pub use error::{ChannelError, ChannelResult};
pub use handshake::{Handshake, HandshakeResponder};
pub use kdf::{derive_psk, derive_session_key, key_id, SecretKey};
