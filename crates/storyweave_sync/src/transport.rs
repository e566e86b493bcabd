//! Transport layer abstraction.

use crate::error::{SyncError, SyncResult};

/// A raw bidirectional message transport (in practice a websocket).
///
/// The engine only ever sends complete text frames and receives them via
/// [`crate::ConnectionManager::handle_frame`]; this trait abstracts the
/// outbound half so tests can run without a network.
pub trait MessageTransport {
    /// Sends one text frame.
    fn send(&mut self, frame: &str) -> SyncResult<()>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&mut self);
}

/// A mock transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: bool,
    sent: Vec<String>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: true,
            sent: Vec::new(),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Drains everything sent so far.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// Peeks at everything sent so far.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }
}

impl MessageTransport for MockTransport {
    fn send(&mut self, frame: &str) -> SyncResult<()> {
        if !self.connected {
            return Err(SyncError::transport("not connected"));
        }
        self.sent.push(frame.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_records_frames() {
        let mut transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.send("one").unwrap();
        transport.send("two").unwrap();
        assert_eq!(transport.sent(), ["one", "two"]);
        assert_eq!(transport.take_sent(), ["one", "two"]);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn mock_transport_disconnected_send_fails() {
        let mut transport = MockTransport::new();
        transport.close();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send("frame"),
            Err(SyncError::Transport { .. })
        ));
    }
}
