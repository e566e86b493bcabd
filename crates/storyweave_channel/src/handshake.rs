//! Mutual proof-of-possession handshake.
//!
//! Two cleartext frames establish the session:
//!
//! 1. Initiator → responder: `sw_hello{key_id, cnonce, mac}` where
//!    `mac = HMAC(PSK, "hello" || cnonce)`.
//! 2. Responder → initiator: `sw_hello_ok{snonce, mac}` where
//!    `mac = HMAC(PSK, "server" || cnonce || snonce)`.
//!
//! Both sides then derive the session key from `(PSK, cnonce, snonce)`.
//! MAC verification is constant-time; any failure aborts the connection.

use crate::channel::SecureChannel;
use crate::error::{ChannelError, ChannelResult};
use crate::kdf::{derive_psk, derive_session_key, key_id, SecretKey};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use storyweave_protocol::ChannelFrame;

type HmacSha256 = Hmac<Sha256>;

/// Size of handshake nonces in bytes.
pub const NONCE_SIZE: usize = 32;

const HELLO_CONTEXT: &[u8] = b"hello";
const SERVER_CONTEXT: &[u8] = b"server";

/// Initiator-side handshake state, alive between the two frames.
pub struct Handshake {
    psk: SecretKey,
    cnonce: [u8; NONCE_SIZE],
}

impl Handshake {
    /// Starts a handshake, returning the state to keep and the `sw_hello`
    /// frame to send in the clear.
    pub fn initiate(shared_secret: &str) -> (Self, ChannelFrame) {
        let psk = derive_psk(shared_secret);
        let mut cnonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut cnonce);

        let mac = sign(&psk, &[HELLO_CONTEXT, &cnonce]);
        let hello = ChannelFrame::SwHello {
            key_id: key_id(shared_secret),
            cnonce: B64.encode(cnonce),
            mac: B64.encode(mac),
        };
        (Self { psk, cnonce }, hello)
    }

    /// Completes the handshake from the peer's `sw_hello_ok` fields.
    ///
    /// # Errors
    ///
    /// Fails when the peer MAC does not verify — the caller must abort
    /// the connection, never proceed unauthenticated.
    pub fn finish(self, snonce_b64: &str, mac_b64: &str) -> ChannelResult<SecureChannel> {
        let snonce = decode_b64(snonce_b64, "snonce")?;
        let mac = decode_b64(mac_b64, "mac")?;

        verify(
            &self.psk,
            &[SERVER_CONTEXT, &self.cnonce, &snonce],
            &mac,
            ChannelError::BadPeerMac,
        )?;

        let session = derive_session_key(&self.psk, &self.cnonce, &snonce);
        Ok(SecureChannel::new(session))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake").finish_non_exhaustive()
    }
}

/// Responder side of the same contract.
///
/// The deployed peer implements this; it also powers the in-process peer
/// used by the sync integration tests.
pub struct HandshakeResponder {
    shared_secret: String,
}

impl HandshakeResponder {
    /// Creates a responder holding the shared secret.
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
        }
    }

    /// Handles an `sw_hello` frame: verifies the initiator's proof and
    /// produces the `sw_hello_ok` reply plus the established channel.
    ///
    /// # Errors
    ///
    /// Fails on an unknown key id or a bad client MAC.
    pub fn respond(
        &self,
        offered_key_id: &str,
        cnonce_b64: &str,
        mac_b64: &str,
    ) -> ChannelResult<(ChannelFrame, SecureChannel)> {
        if offered_key_id != key_id(&self.shared_secret) {
            return Err(ChannelError::UnknownKeyId);
        }

        let cnonce = decode_b64(cnonce_b64, "cnonce")?;
        let mac = decode_b64(mac_b64, "mac")?;

        let psk = derive_psk(&self.shared_secret);
        verify(
            &psk,
            &[HELLO_CONTEXT, &cnonce],
            &mac,
            ChannelError::BadClientMac,
        )?;

        let mut snonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut snonce);

        let reply_mac = sign(&psk, &[SERVER_CONTEXT, &cnonce, &snonce]);
        let reply = ChannelFrame::SwHelloOk {
            snonce: B64.encode(snonce),
            mac: B64.encode(reply_mac),
        };

        let session = derive_session_key(&psk, &cnonce, &snonce);
        Ok((reply, SecureChannel::new(session)))
    }
}

fn sign(key: &SecretKey, parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

fn verify(
    key: &SecretKey,
    parts: &[&[u8]],
    tag: &[u8],
    on_failure: ChannelError,
) -> ChannelResult<()> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key size");
    for part in parts {
        mac.update(part);
    }
    // verify_slice is a constant-time comparison.
    mac.verify_slice(tag).map_err(|_| on_failure)
}

fn decode_b64(value: &str, field: &'static str) -> ChannelResult<Vec<u8>> {
    B64.decode(value)
        .map_err(|_| ChannelError::InvalidEncoding { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "activation-key-for-tests";

    fn run_handshake() -> (SecureChannel, SecureChannel) {
        let (state, hello) = Handshake::initiate(SECRET);
        let ChannelFrame::SwHello {
            key_id,
            cnonce,
            mac,
        } = hello
        else {
            panic!("expected sw_hello");
        };

        let responder = HandshakeResponder::new(SECRET);
        let (reply, server_channel) = responder.respond(&key_id, &cnonce, &mac).unwrap();
        let ChannelFrame::SwHelloOk { snonce, mac } = reply else {
            panic!("expected sw_hello_ok");
        };

        let client_channel = state.finish(&snonce, &mac).unwrap();
        (client_channel, server_channel)
    }

    #[test]
    fn both_sides_agree_on_the_session() {
        let (mut client, mut server) = run_handshake();

        let sealed = client.seal(b"ping").unwrap();
        let ChannelFrame::SwMsg { seq, ct } = sealed else {
            panic!("expected sw_msg");
        };
        assert_eq!(server.open(seq, &ct).unwrap(), b"ping");
    }

    #[test]
    fn responder_rejects_unknown_key_id() {
        let (_, hello) = Handshake::initiate(SECRET);
        let ChannelFrame::SwHello { cnonce, mac, .. } = hello else {
            panic!("expected sw_hello");
        };

        let responder = HandshakeResponder::new(SECRET);
        let result = responder.respond("deadbeef", &cnonce, &mac);
        assert_eq!(result.err(), Some(ChannelError::UnknownKeyId));
    }

    #[test]
    fn responder_rejects_wrong_secret() {
        // Same key id, different secret: impossible in practice, but the
        // MAC check must still hold on its own.
        let (_, hello) = Handshake::initiate("wrong-secret");
        let ChannelFrame::SwHello { cnonce, mac, .. } = hello else {
            panic!("expected sw_hello");
        };

        let responder = HandshakeResponder::new(SECRET);
        let result = responder.respond(&key_id(SECRET), &cnonce, &mac);
        assert_eq!(result.err(), Some(ChannelError::BadClientMac));
    }

    #[test]
    fn initiator_rejects_tampered_server_mac() {
        let (state, hello) = Handshake::initiate(SECRET);
        let ChannelFrame::SwHello {
            key_id,
            cnonce,
            mac,
        } = hello
        else {
            panic!("expected sw_hello");
        };

        let responder = HandshakeResponder::new(SECRET);
        let (reply, _) = responder.respond(&key_id, &cnonce, &mac).unwrap();
        let ChannelFrame::SwHelloOk { snonce, .. } = reply else {
            panic!("expected sw_hello_ok");
        };

        let bogus_mac = B64.encode([0u8; 32]);
        let result = state.finish(&snonce, &bogus_mac);
        assert_eq!(result.err(), Some(ChannelError::BadPeerMac));
    }

    #[test]
    fn malformed_base64_is_rejected() {
        let (state, _) = Handshake::initiate(SECRET);
        let result = state.finish("!!!not-base64!!!", "bWFj");
        assert_eq!(
            result.err(),
            Some(ChannelError::InvalidEncoding { field: "snonce" })
        );
    }
}
