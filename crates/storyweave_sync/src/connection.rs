//! Connection lifecycle and frame dispatch.

use crate::config::{SyncConfig, SyncMode};
use crate::error::{SyncError, SyncResult};
use crate::host::SyncHost;
use crate::optimistic::OptimisticSync;
use crate::strategy::{Outbox, SyncStrategy};
use crate::transport::MessageTransport;
use std::time::Instant;
use storyweave_channel::{Handshake, SecureChannel};
use storyweave_protocol::{ChannelFrame, ClientMessage, ServerMessage};
use tracing::{debug, warn};

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No connection attempt in progress.
    Disconnected,
    /// `sw_hello` sent, waiting for the peer's answer.
    Handshaking,
    /// Channel established, waiting for application-layer auth.
    Authenticating,
    /// Authenticated; the strategy owns the conversation.
    Ready,
}

/// Owns the transport, the secure channel, and the active strategy.
///
/// The surrounding event loop feeds it three things, all on one thread:
/// inbound frames ([`handle_frame`](Self::handle_frame)), timer ticks
/// ([`tick`](Self::tick)), and edit notifications
/// ([`mark_dirty`](Self::mark_dirty)). Handlers run to completion; no
/// state here needs locking.
pub struct ConnectionManager<T: MessageTransport> {
    config: SyncConfig,
    transport: T,
    phase: ConnectionPhase,
    handshake: Option<Handshake>,
    channel: Option<SecureChannel>,
    strategy: Box<dyn SyncStrategy>,
}

impl<T: MessageTransport> ConnectionManager<T> {
    /// Creates a manager, selecting the strategy from the config.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, including requesting CRDT mode in
    /// a build without the `crdt` capability.
    pub fn new(config: SyncConfig, transport: T) -> SyncResult<Self> {
        config.validate()?;
        let strategy = make_strategy(&config)?;
        Ok(Self {
            config,
            transport,
            phase: ConnectionPhase::Disconnected,
            handshake: None,
            channel: None,
            strategy,
        })
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Returns true once the subscribe reply has been processed.
    pub fn is_subscribed(&self) -> bool {
        self.strategy.is_subscribed()
    }

    /// Gives access to the transport (tests use this to drain frames).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Starts the encrypted-channel handshake.
    pub fn connect(&mut self, host: &dyn SyncHost) -> SyncResult<()> {
        if !self.transport.is_connected() {
            return Err(SyncError::transport("transport is not connected"));
        }
        host.status("Connecting: channel handshake…");
        let (handshake, hello) = Handshake::initiate(&self.config.shared_secret);
        self.handshake = Some(handshake);
        self.phase = ConnectionPhase::Handshaking;
        self.transport.send(&hello.encode())
    }

    /// Processes one raw inbound frame.
    ///
    /// Fatal errors (cryptographic, configuration) close the connection
    /// before returning; everything else is surfaced through the host
    /// and leaves the connection up.
    pub fn handle_frame(
        &mut self,
        raw: &str,
        now: Instant,
        host: &dyn SyncHost,
    ) -> SyncResult<()> {
        let result = self.handle_frame_inner(raw, now, host);
        if let Err(ref error) = result {
            host.error(&error.to_string());
            if error.is_fatal() {
                warn!(%error, "fatal error, closing connection");
                self.close(host);
            }
        }
        result
    }

    fn handle_frame_inner(
        &mut self,
        raw: &str,
        now: Instant,
        host: &dyn SyncHost,
    ) -> SyncResult<()> {
        let frame = ChannelFrame::decode(raw)
            .map_err(|e| SyncError::transport(format!("malformed frame: {e}")))?;

        match frame {
            ChannelFrame::SwHelloOk { snonce, mac } => {
                let Some(handshake) = self.handshake.take() else {
                    return Err(SyncError::transport("unexpected sw_hello_ok"));
                };
                let channel = handshake.finish(&snonce, &mac)?;
                self.channel = Some(channel);
                self.phase = ConnectionPhase::Authenticating;
                debug!("channel established");
                host.status("Channel encrypted. Authenticating…");
                self.send_message(&ClientMessage::Auth {
                    access_token: self.config.access_token.clone(),
                })
            }

            ChannelFrame::SwMsg { seq, ct } => {
                let plaintext = self
                    .channel
                    .as_mut()
                    .ok_or_else(|| SyncError::transport("sealed frame before handshake"))?
                    .open(seq, &ct)?;
                let text = String::from_utf8(plaintext)
                    .map_err(|_| SyncError::transport("sealed frame is not UTF-8"))?;
                let message = ServerMessage::decode(&text)?;
                self.dispatch(message, now, host)
            }

            ChannelFrame::SwHello { .. } => {
                Err(SyncError::transport("unexpected sw_hello from peer"))
            }
        }
    }

    fn dispatch(
        &mut self,
        message: ServerMessage,
        now: Instant,
        host: &dyn SyncHost,
    ) -> SyncResult<()> {
        if self.phase == ConnectionPhase::Authenticating {
            return match message {
                ServerMessage::AuthOk => {
                    self.phase = ConnectionPhase::Ready;
                    debug!("authenticated, subscribing");
                    host.status("Authenticated. Subscribing…");
                    let mut out = Outbox::new();
                    self.strategy.subscribe(&mut out);
                    self.send_outbox(out)
                }
                ServerMessage::Error { detail } => {
                    // A rejected credential is a configuration problem:
                    // report once, no retry loop.
                    Err(SyncError::config(format!("authentication failed: {detail}")))
                }
                other => {
                    debug!(?other, "dropping sync message before auth completed");
                    Ok(())
                }
            };
        }

        let mut out = Outbox::new();
        let result = self.strategy.handle_message(message, now, host, &mut out);
        self.send_outbox(out)?;
        result
    }

    /// Drives the strategy's timers. Call this periodically (a few times
    /// per debounce window) with the current instant.
    pub fn tick(&mut self, now: Instant, host: &dyn SyncHost) -> SyncResult<()> {
        if self.phase != ConnectionPhase::Ready {
            return Ok(());
        }
        let mut out = Outbox::new();
        self.strategy.tick(now, host, &mut out)?;
        self.send_outbox(out)
    }

    /// Notes that local state changed.
    pub fn mark_dirty(&mut self, now: Instant) {
        self.strategy.mark_dirty(now);
    }

    /// Forces a full flush (shutdown, manual save), bypassing debounce.
    pub fn flush_now(&mut self, host: &dyn SyncHost) -> SyncResult<()> {
        let mut out = Outbox::new();
        self.strategy.flush_now(host, &mut out)?;
        self.send_outbox(out)
    }

    /// Flushes outstanding work and closes the connection.
    pub fn shutdown(&mut self, host: &dyn SyncHost) -> SyncResult<()> {
        let result = self.flush_now(host);
        self.close(host);
        result
    }

    /// Handles a transport-level disconnect: all in-flight and session
    /// state is discarded unconditionally.
    pub fn disconnected(&mut self, host: &dyn SyncHost) {
        self.phase = ConnectionPhase::Disconnected;
        self.handshake = None;
        self.channel = None;
        self.strategy.reset();
        host.status("Disconnected from server.");
    }

    fn close(&mut self, host: &dyn SyncHost) {
        self.transport.close();
        self.disconnected(host);
    }

    fn send_outbox(&mut self, mut out: Outbox) -> SyncResult<()> {
        for message in out.drain() {
            self.send_message(&message)?;
        }
        Ok(())
    }

    fn send_message(&mut self, message: &ClientMessage) -> SyncResult<()> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| SyncError::transport("channel not established"))?;
        let sealed = channel.seal(message.encode().as_bytes())?;
        self.transport.send(&sealed.encode())
    }
}

fn make_strategy(config: &SyncConfig) -> SyncResult<Box<dyn SyncStrategy>> {
    match config.mode {
        SyncMode::Optimistic => Ok(Box::new(OptimisticSync::new(config))),
        #[cfg(feature = "crdt")]
        SyncMode::Crdt => Ok(Box::new(crate::crdt::CrdtSync::new(config))),
        #[cfg(not(feature = "crdt"))]
        SyncMode::Crdt => Err(SyncError::config(
            "CRDT mode requested but this build lacks the crdt capability",
        )),
    }
}
