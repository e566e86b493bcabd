//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Which reconciliation strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Diff/ops reconciliation with server-assigned revisions and
    /// conflict rebase.
    Optimistic,
    /// Converging replicated document with state-vector deltas.
    Crdt,
}

/// Configuration for a sync connection.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The shared project to join.
    pub game_id: String,
    /// Long-lived pre-shared secret for the encrypted channel.
    pub shared_secret: String,
    /// Bearer credential for application-layer auth.
    pub access_token: String,
    /// Display name reported to collaborators.
    pub username: String,
    /// Reconciliation strategy.
    pub mode: SyncMode,
    /// How long a burst of local edits coalesces before one flush.
    pub debounce_window: Duration,
    /// Fallback dirty-detection interval (full-snapshot hash compare).
    pub poll_interval: Duration,
}

impl SyncConfig {
    /// Creates a configuration with the default timers.
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            shared_secret: String::new(),
            access_token: String::new(),
            username: "local".into(),
            mode: SyncMode::Optimistic,
            debounce_window: Duration::from_millis(250),
            poll_interval: Duration::from_millis(400),
        }
    }

    /// Sets the pre-shared secret.
    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = secret.into();
        self
    }

    /// Sets the bearer credential.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Sets the display name.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Sets the reconciliation strategy.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Sets the dirty-poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks that the configuration can start a sync attempt.
    ///
    /// # Errors
    ///
    /// Missing secret or credential is reported once, before any network
    /// activity; there is no retry loop for configuration problems.
    pub fn validate(&self) -> SyncResult<()> {
        if self.game_id.trim().is_empty() {
            return Err(SyncError::config("game_id is not set"));
        }
        if self.shared_secret.trim().is_empty() {
            return Err(SyncError::config(
                "shared secret is not set (required for the encrypted channel)",
            ));
        }
        if self.access_token.trim().is_empty() {
            return Err(SyncError::config("access token is not set"));
        }
        Ok(())
    }
}
