//! Key derivation.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of derived keys in bytes.
pub const KEY_SIZE: usize = 32;

/// HKDF salt for deriving the PSK from the activation key.
const PSK_SALT: &[u8] = b"sw-psk-v1";
/// HKDF info label for the PSK derivation.
const PSK_INFO: &[u8] = b"sw-activation-psk";
/// HKDF info label for the session-key derivation.
const SESSION_INFO: &[u8] = b"sw-session-v1";

/// A 32-byte symmetric key, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key as a byte slice.
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives the pre-shared key from the long-lived shared secret.
///
/// HKDF is appropriate here because the activation key already carries
/// high entropy; it is not a user-chosen password.
pub fn derive_psk(shared_secret: &str) -> SecretKey {
    let hk = Hkdf::<Sha256>::new(Some(PSK_SALT), shared_secret.as_bytes());
    let mut bytes = [0u8; KEY_SIZE];
    hk.expand(PSK_INFO, &mut bytes)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    SecretKey::from_bytes(bytes)
}

/// Derives the per-connection session key from the PSK and both nonces.
///
/// The nonces salt the derivation, so every connection gets a fresh key
/// even though the PSK never changes.
pub fn derive_session_key(psk: &SecretKey, cnonce: &[u8], snonce: &[u8]) -> SecretKey {
    let mut salt = Vec::with_capacity(cnonce.len() + snonce.len());
    salt.extend_from_slice(cnonce);
    salt.extend_from_slice(snonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), psk.as_bytes());
    let mut bytes = [0u8; KEY_SIZE];
    hk.expand(SESSION_INFO, &mut bytes)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    SecretKey::from_bytes(bytes)
}

/// Computes the public identifier of a shared secret.
///
/// Sent in the clear during the handshake so the peer can select the
/// right key without learning anything about the secret itself.
pub fn key_id(shared_secret: &str) -> String {
    let digest = Sha256::digest(shared_secret.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psk_is_deterministic() {
        let a = derive_psk("activation-key");
        let b = derive_psk("activation-key");
        assert_eq!(a.as_bytes(), b.as_bytes());

        let c = derive_psk("other-key");
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn session_key_depends_on_both_nonces() {
        let psk = derive_psk("activation-key");
        let k1 = derive_session_key(&psk, &[1u8; 32], &[2u8; 32]);
        let k2 = derive_session_key(&psk, &[1u8; 32], &[2u8; 32]);
        let k3 = derive_session_key(&psk, &[9u8; 32], &[2u8; 32]);
        let k4 = derive_session_key(&psk, &[1u8; 32], &[9u8; 32]);

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
        assert_ne!(k1.as_bytes(), k4.as_bytes());
    }

    #[test]
    fn key_id_is_hex_sha256() {
        let id = key_id("secret");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, key_id("secret"));
        assert_ne!(id, key_id("other"));
    }

    #[test]
    fn debug_redacts_key_material() {
        let key = derive_psk("secret");
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
    }
}
