//! Wire messages.
//!
//! Two layers travel over the raw transport:
//!
//! - [`ChannelFrame`] — the cleartext envelope layer: the two handshake
//!   frames plus the sealed carrier for everything else.
//! - [`ClientMessage`] / [`ServerMessage`] — application messages, JSON
//!   encoded and AEAD-sealed inside `sw_msg` frames once the channel is
//!   established.
//!
//! All binary fields (nonces, MACs, ciphertext, CRDT updates, state
//! vectors) are base64 strings inside the JSON.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use storyweave_codec::Value;

/// Cleartext envelope frames on the raw transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelFrame {
    /// Client handshake offer: proof of possession of the pre-shared key.
    SwHello {
        /// SHA-256 hex of the shared secret; lets the peer pick the key.
        key_id: String,
        /// Client nonce (32 bytes, base64).
        cnonce: String,
        /// HMAC over `"hello" || cnonce` keyed by the PSK (base64).
        mac: String,
    },
    /// Peer handshake answer.
    SwHelloOk {
        /// Server nonce (32 bytes, base64).
        snonce: String,
        /// HMAC over `"server" || cnonce || snonce` keyed by the PSK (base64).
        mac: String,
    },
    /// A sealed application message.
    SwMsg {
        /// Plaintext send-sequence number; must match the receiver's
        /// expectation exactly.
        seq: u64,
        /// AEAD ciphertext (base64).
        ct: String,
    },
}

impl ChannelFrame {
    /// Encodes this frame to its wire JSON.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("channel frames always serialize")
    }

    /// Decodes a frame from wire JSON.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::decode(e.to_string()))
    }
}

/// Write permission assigned by the peer at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control of the game.
    Admin,
    /// Writing collaborator.
    Master,
    /// Read-only subscriber; outbound updates must be suppressed.
    Reader,
}

impl Role {
    /// Returns true if this role may publish local edits.
    pub fn can_write(self) -> bool {
        !matches!(self, Role::Reader)
    }
}

/// Application messages sent client → peer (inside sealed frames).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-layer authentication; must precede any sync message.
    Auth {
        /// Bearer credential.
        access_token: String,
    },
    /// Subscribe in optimistic mode; the reply carries a full snapshot.
    Subscribe {
        /// The shared project to join.
        game_id: String,
    },
    /// Subscribe in CRDT mode, announcing what the client already has.
    CrdtSubscribe {
        /// The shared project to join.
        game_id: String,
        /// Local state vector (base64).
        state_vector_b64: String,
    },
    /// An optimistic op batch against a base revision.
    Event {
        /// Revision the batch was computed against.
        base_revision: u64,
        /// The ordered op list.
        ops: Vec<Operation>,
    },
    /// An incremental CRDT update.
    CrdtUpdate {
        /// The shared project.
        game_id: String,
        /// Binary update (base64).
        update_b64: String,
    },
}

/// Application messages sent peer → client (inside sealed frames).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Application-layer auth accepted.
    AuthOk,
    /// Optimistic subscribe accepted: full snapshot plus its revision.
    Subscribed {
        /// Complete project state.
        state: Value,
        /// Server revision of that state.
        revision: u64,
    },
    /// CRDT subscribe accepted.
    CrdtSubscribed {
        /// Write permission for this client.
        role: Role,
        /// Catch-up delta covering everything the client's vector lacked
        /// (base64).
        update_b64: String,
        /// The peer's state vector after the delta (base64).
        state_vector_b64: String,
    },
    /// Broadcast of a committed op batch (including the sender's echo).
    Event {
        /// The ordered op list.
        ops: Vec<Operation>,
        /// Revision the batch was applied on top of.
        base_revision: u64,
        /// Revision after applying the batch.
        new_revision: u64,
    },
    /// Direct acknowledgment of the sender's batch.
    Ack {
        /// Revision after applying the batch.
        new_revision: u64,
    },
    /// The in-flight batch was rejected (stale base revision).
    Conflict,
    /// Broadcast of another client's CRDT update.
    CrdtUpdate {
        /// Binary update (base64).
        update_b64: String,
    },
    /// Acknowledgment of the client's CRDT update.
    CrdtAck {
        /// The peer's state vector after the merge (base64).
        state_vector_b64: String,
    },
    /// Fatal for the current operation, not necessarily the connection.
    Error {
        /// Human-readable detail.
        detail: String,
    },
}

impl ClientMessage {
    /// Encodes this message to its wire JSON.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("client messages always serialize")
    }

    /// Decodes a message from wire JSON.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::decode(e.to_string()))
    }
}

impl ServerMessage {
    /// Encodes this message to its wire JSON.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("server messages always serialize")
    }

    /// Decodes a message from wire JSON.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_frame_wire_shape() {
        let frame = ChannelFrame::SwMsg {
            seq: 7,
            ct: "AAEC".into(),
        };
        assert_eq!(frame.encode(), r#"{"type":"sw_msg","seq":7,"ct":"AAEC"}"#);
        assert_eq!(ChannelFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn hello_frames_roundtrip() {
        let hello = ChannelFrame::SwHello {
            key_id: "ab".into(),
            cnonce: "bm9uY2U=".into(),
            mac: "bWFj".into(),
        };
        let decoded = ChannelFrame::decode(&hello.encode()).unwrap();
        assert_eq!(decoded, hello);

        let ok = ChannelFrame::SwHelloOk {
            snonce: "c25vbmNl".into(),
            mac: "bWFj".into(),
        };
        assert_eq!(ChannelFrame::decode(&ok.encode()).unwrap(), ok);
    }

    #[test]
    fn client_message_wire_shape() {
        let msg = ClientMessage::Subscribe {
            game_id: "g1".into(),
        };
        assert_eq!(msg.encode(), r#"{"type":"subscribe","game_id":"g1"}"#);

        let msg = ClientMessage::Event {
            base_revision: 4,
            ops: vec![Operation::delete("characters.c1")],
        };
        let decoded = ClientMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn server_message_unit_variants() {
        assert_eq!(
            ServerMessage::decode(r#"{"type":"conflict"}"#).unwrap(),
            ServerMessage::Conflict
        );
        assert_eq!(
            ServerMessage::decode(r#"{"type":"auth_ok"}"#).unwrap(),
            ServerMessage::AuthOk
        );
    }

    #[test]
    fn server_snapshot_roundtrip() {
        let msg = ServerMessage::Subscribed {
            state: Value::object(vec![("characters", Value::empty_map())]),
            revision: 12,
        };
        assert_eq!(ServerMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn roles() {
        assert!(Role::Admin.can_write());
        assert!(Role::Master.can_write());
        assert!(!Role::Reader.can_write());

        let msg = ServerMessage::CrdtSubscribed {
            role: Role::Reader,
            update_b64: String::new(),
            state_vector_b64: String::new(),
        };
        assert!(msg.encode().contains(r#""role":"reader""#));
    }

    #[test]
    fn unknown_message_type_fails() {
        assert!(ServerMessage::decode(r#"{"type":"mystery"}"#).is_err());
        assert!(ClientMessage::decode("not json").is_err());
    }
}
