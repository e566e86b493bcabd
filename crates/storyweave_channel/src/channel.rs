//! Sequenced AEAD framing.

use crate::error::{ChannelError, ChannelResult};
use crate::kdf::SecretKey;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use storyweave_protocol::ChannelFrame;

/// Domain-separation tag authenticated with every frame.
const FRAME_AAD: &[u8] = b"sw-ws-v1";

/// Size of the AEAD nonce in bytes.
const NONCE_SIZE: usize = 12;

/// An established encrypted channel.
///
/// Holds the session key and both direction counters. Sealing uses and
/// advances the send counter; opening requires the frame's declared
/// sequence to equal the receive counter exactly and advances it only on
/// success. A replayed, reordered, or dropped frame therefore fails hard,
/// forcing a fresh handshake instead of a silent desync.
pub struct SecureChannel {
    cipher: ChaCha20Poly1305,
    send_seq: u64,
    recv_seq: u64,
}

impl SecureChannel {
    pub(crate) fn new(key: SecretKey) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        Self {
            cipher,
            send_seq: 0,
            recv_seq: 0,
        }
    }

    /// Seals a plaintext into the next outbound `sw_msg` frame.
    pub fn seal(&mut self, plaintext: &[u8]) -> ChannelResult<ChannelFrame> {
        let nonce_bytes = nonce_for(self.send_seq);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: FRAME_AAD,
                },
            )
            .map_err(|_| ChannelError::SealFailed)?;

        let frame = ChannelFrame::SwMsg {
            seq: self.send_seq,
            ct: B64.encode(ciphertext),
        };
        self.send_seq += 1;
        Ok(frame)
    }

    /// Opens an inbound `sw_msg` frame's fields.
    ///
    /// # Errors
    ///
    /// Fails on sequence mismatch (without advancing the receive counter)
    /// or on AEAD authentication failure. Both are fatal.
    pub fn open(&mut self, seq: u64, ct_b64: &str) -> ChannelResult<Vec<u8>> {
        if seq != self.recv_seq {
            return Err(ChannelError::SequenceMismatch {
                expected: self.recv_seq,
                got: seq,
            });
        }

        let ciphertext = B64
            .decode(ct_b64)
            .map_err(|_| ChannelError::InvalidEncoding { field: "ct" })?;

        let nonce_bytes = nonce_for(self.recv_seq);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ciphertext,
                    aad: FRAME_AAD,
                },
            )
            .map_err(|_| ChannelError::OpenFailed)?;

        self.recv_seq += 1;
        Ok(plaintext)
    }

    /// The next outbound sequence number.
    pub fn send_seq(&self) -> u64 {
        self.send_seq
    }

    /// The expected next inbound sequence number.
    pub fn recv_seq(&self) -> u64 {
        self.recv_seq
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("send_seq", &self.send_seq)
            .field("recv_seq", &self.recv_seq)
            .finish_non_exhaustive()
    }
}

/// Builds the deterministic AEAD nonce for a sequence number:
/// 4 zero bytes followed by the big-endian counter. Unique per direction
/// per session key, which is all ChaCha20-Poly1305 needs.
fn nonce_for(seq: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}
