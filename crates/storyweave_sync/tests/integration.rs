//! End-to-end tests: connection manager against an in-process peer.
//!
//! The peer implements the responder half of the channel contract plus
//! the optimistic server semantics (snapshot on subscribe, serialized
//! batch application, conflict on stale base revision), so the full
//! connect → handshake → auth → subscribe → edit → ack/conflict loop
//! runs over real sealed frames.

use std::time::{Duration, Instant};
use storyweave_channel::{HandshakeResponder, SecureChannel};
use storyweave_codec::Value;
use storyweave_protocol::{
    apply_ops, ChannelFrame, ClientMessage, Operation, ServerMessage,
};
use storyweave_sync::{
    ConnectionManager, ConnectionPhase, MessageTransport, MockTransport, RecordingHost,
    SyncConfig, SyncError,
};

const SECRET: &str = "test-activation-key";
const TOKEN: &str = "bearer-token";

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A single-client optimistic peer.
struct TestPeer {
    responder: HandshakeResponder,
    channel: Option<SecureChannel>,
    state: Value,
    revision: u64,
    /// Answer committed batches with a broadcast echo instead of a
    /// direct ack.
    echo_events: bool,
}

impl TestPeer {
    fn new(state: Value, revision: u64) -> Self {
        Self {
            responder: HandshakeResponder::new(SECRET),
            channel: None,
            state,
            revision,
            echo_events: false,
        }
    }

    fn seal(&mut self, message: &ServerMessage) -> String {
        self.channel
            .as_mut()
            .expect("peer channel established")
            .seal(message.encode().as_bytes())
            .unwrap()
            .encode()
    }

    /// Commits a write from "another client", returning the broadcast
    /// frame for our subscriber.
    fn server_write(&mut self, ops: Vec<Operation>) -> String {
        let base_revision = self.revision;
        apply_ops(&mut self.state, &ops).unwrap();
        self.revision += 1;
        let event = ServerMessage::Event {
            ops,
            base_revision,
            new_revision: self.revision,
        };
        self.seal(&event)
    }

    /// Handles one client frame, returning reply frames in order.
    fn handle(&mut self, raw: &str) -> Vec<String> {
        match ChannelFrame::decode(raw).unwrap() {
            ChannelFrame::SwHello {
                key_id,
                cnonce,
                mac,
            } => {
                let (reply, channel) = self.responder.respond(&key_id, &cnonce, &mac).unwrap();
                self.channel = Some(channel);
                vec![reply.encode()]
            }

            ChannelFrame::SwMsg { seq, ct } => {
                let plaintext = self
                    .channel
                    .as_mut()
                    .expect("sealed frame before handshake")
                    .open(seq, &ct)
                    .unwrap();
                let message =
                    ClientMessage::decode(std::str::from_utf8(&plaintext).unwrap()).unwrap();
                self.handle_message(message)
            }

            ChannelFrame::SwHelloOk { .. } => panic!("client sent sw_hello_ok"),
        }
    }

    fn handle_message(&mut self, message: ClientMessage) -> Vec<String> {
        match message {
            ClientMessage::Auth { access_token } => {
                let reply = if access_token == TOKEN {
                    ServerMessage::AuthOk
                } else {
                    ServerMessage::Error {
                        detail: "invalid access token".into(),
                    }
                };
                vec![self.seal(&reply)]
            }

            ClientMessage::Subscribe { .. } => {
                let reply = ServerMessage::Subscribed {
                    state: self.state.clone(),
                    revision: self.revision,
                };
                vec![self.seal(&reply)]
            }

            ClientMessage::Event { base_revision, ops } => {
                if base_revision != self.revision {
                    return vec![self.seal(&ServerMessage::Conflict)];
                }
                apply_ops(&mut self.state, &ops).unwrap();
                self.revision += 1;
                let reply = if self.echo_events {
                    ServerMessage::Event {
                        ops,
                        base_revision,
                        new_revision: self.revision,
                    }
                } else {
                    ServerMessage::Ack {
                        new_revision: self.revision,
                    }
                };
                vec![self.seal(&reply)]
            }

            other => panic!("peer got unexpected message: {other:?}"),
        }
    }
}

/// Shuttles frames both ways until neither side has anything queued.
fn pump(
    manager: &mut ConnectionManager<MockTransport>,
    peer: &mut TestPeer,
    now: Instant,
    host: &RecordingHost,
) {
    loop {
        let outbound = manager.transport_mut().take_sent();
        if outbound.is_empty() {
            break;
        }
        for frame in outbound {
            for reply in peer.handle(&frame) {
                manager.handle_frame(&reply, now, host).unwrap();
            }
        }
    }
}

fn aria_state(name: &str) -> Value {
    Value::object(vec![(
        "characters",
        Value::object(vec![(
            "c1",
            Value::object(vec![("name", Value::from(name))]),
        )]),
    )])
}

fn connect_and_subscribe(
    peer: &mut TestPeer,
    host: &RecordingHost,
) -> ConnectionManager<MockTransport> {
    init_tracing();
    let config = SyncConfig::new("g1")
        .with_shared_secret(SECRET)
        .with_access_token(TOKEN);
    let mut manager = ConnectionManager::new(config, MockTransport::new()).unwrap();
    manager.connect(host).unwrap();
    pump(&mut manager, peer, Instant::now(), host);
    assert_eq!(manager.phase(), ConnectionPhase::Ready);
    assert!(manager.is_subscribed());
    manager
}

#[test]
fn connect_auth_subscribe_edit_ack() {
    let host = RecordingHost::new();
    let mut peer = TestPeer::new(Value::object(vec![("characters", Value::empty_map())]), 0);
    let mut manager = connect_and_subscribe(&mut peer, &host);

    // The subscribe snapshot reached the host.
    assert_eq!(host.replaced().len(), 1);
    assert_eq!(host.replaced()[0].1, 0);

    // Local edit, debounced flush, ack.
    let now = Instant::now();
    host.set_state(aria_state("Aria"));
    manager.mark_dirty(now);
    manager.tick(now + Duration::from_millis(300), &host).unwrap();
    pump(&mut manager, &mut peer, now, &host);

    assert_eq!(peer.revision, 1);
    assert_eq!(peer.state, aria_state("Aria"));
}

#[test]
fn echo_broadcast_resolves_the_batch() {
    let host = RecordingHost::new();
    let mut peer = TestPeer::new(Value::object(vec![("characters", Value::empty_map())]), 0);
    peer.echo_events = true;
    let mut manager = connect_and_subscribe(&mut peer, &host);

    let now = Instant::now();
    host.set_state(aria_state("Aria"));
    manager.mark_dirty(now);
    manager.tick(now + Duration::from_millis(300), &host).unwrap();
    pump(&mut manager, &mut peer, now, &host);

    assert_eq!(peer.revision, 1);
    // The echo was recognized as our own batch, not a remote change.
    assert_eq!(host.remote_applied_count(), 0);

    // A later genuine remote event still comes through.
    let broadcast = peer.server_write(vec![Operation::upsert(
        "characters",
        "c2",
        Value::object(vec![("name", Value::from("Borin"))]),
    )]);
    manager.handle_frame(&broadcast, now, &host).unwrap();
    assert_eq!(host.remote_applied_count(), 1);
}

#[test]
fn conflict_rebase_lands_local_intent() {
    // Our rename is in flight when another client's rename commits
    // first; after the rebase our intent wins.
    let host = RecordingHost::new();
    let mut peer = TestPeer::new(aria_state("Aria"), 1);
    let mut manager = connect_and_subscribe(&mut peer, &host);

    let now = Instant::now();
    host.set_state(aria_state("Aria B"));
    manager.mark_dirty(now);
    manager.tick(now + Duration::from_millis(300), &host).unwrap();
    // Our event frame is queued but not yet delivered.

    // Another client's write commits first and its broadcast reaches us.
    let broadcast = peer.server_write(vec![Operation::upsert(
        "characters",
        "c1",
        Value::object(vec![("name", Value::from("Other"))]),
    )]);
    assert_eq!(peer.revision, 2);
    manager.handle_frame(&broadcast, now, &host).unwrap();

    // Now our stale batch reaches the peer and the conflict round-trips:
    // conflict → resubscribe → snapshot → rebased batch → ack.
    pump(&mut manager, &mut peer, now, &host);

    assert_eq!(peer.revision, 3);
    assert_eq!(peer.state, aria_state("Aria B"));
    // The rebase replaced the host state with the merged shadow.
    let replaced = host.replaced();
    let (last_state, last_revision) = replaced.last().unwrap();
    assert_eq!(*last_revision, 2);
    assert_eq!(last_state, &aria_state("Aria B"));
}

#[test]
fn replayed_frame_is_fatal() {
    let host = RecordingHost::new();
    let mut peer = TestPeer::new(Value::empty_map(), 0);
    let mut manager = connect_and_subscribe(&mut peer, &host);

    let now = Instant::now();
    let broadcast = peer.server_write(vec![Operation::set("schema_version", Value::Int(3))]);
    manager.handle_frame(&broadcast, now, &host).unwrap();

    // Delivering the same sealed frame again violates the strict
    // sequence check and closes the connection.
    let result = manager.handle_frame(&broadcast, now, &host);
    assert!(matches!(result, Err(SyncError::Channel(_))));
    assert_eq!(manager.phase(), ConnectionPhase::Disconnected);
    assert!(!manager.transport_mut().is_connected());
}

#[test]
fn rejected_credential_is_fatal_config_error() {
    let host = RecordingHost::new();
    let mut peer = TestPeer::new(Value::empty_map(), 0);

    let config = SyncConfig::new("g1")
        .with_shared_secret(SECRET)
        .with_access_token("wrong-token");
    let mut manager = ConnectionManager::new(config, MockTransport::new()).unwrap();
    manager.connect(&host).unwrap();

    // Hello → hello_ok → auth → error. The pump stops once the manager
    // closes, so drive it manually and tolerate the final failure.
    let hello = manager.transport_mut().take_sent();
    let mut failed = false;
    for frame in hello {
        for reply in peer.handle(&frame) {
            if manager.handle_frame(&reply, Instant::now(), &host).is_err() {
                failed = true;
            } else {
                for frame in manager.transport_mut().take_sent() {
                    for reply in peer.handle(&frame) {
                        if manager
                            .handle_frame(&reply, Instant::now(), &host)
                            .is_err()
                        {
                            failed = true;
                        }
                    }
                }
            }
        }
    }
    assert!(failed);
    assert_eq!(manager.phase(), ConnectionPhase::Disconnected);
    assert!(host.errors().iter().any(|e| e.contains("authentication")));
}

#[test]
fn shutdown_flushes_pending_edits() {
    let host = RecordingHost::new();
    let mut peer = TestPeer::new(Value::object(vec![("characters", Value::empty_map())]), 0);
    let mut manager = connect_and_subscribe(&mut peer, &host);

    // Edit without waiting for the debounce; shutdown forces the flush.
    host.set_state(aria_state("Aria"));
    manager.flush_now(&host).unwrap();
    pump(&mut manager, &mut peer, Instant::now(), &host);

    assert_eq!(peer.revision, 1);
    assert_eq!(peer.state, aria_state("Aria"));
}
