//! Session connection state.

use serde::{Deserialize, Serialize};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// A transport is being created (or a scheduled restart is imminent).
    Starting,
    /// Unauthenticated; a pairing token is waiting to be scanned.
    Pairing,
    /// Authenticated and live.
    Connected,
    /// Recoverable disconnect; a restart is scheduled.
    Reconnecting,
    /// Terminal disconnect: credentials were rejected and no restart will
    /// happen without external intervention.
    LoggedOut,
}

impl ConnectionState {
    /// Whether the session is authenticated and live.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the supervisor has given up without external input.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::LoggedOut)
    }
}

/// Read-only snapshot of the session for status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    /// Pairing token waiting to be scanned, present only while `Pairing`.
    pub pairing_token: Option<String>,
}

impl SessionStatus {
    pub fn connected(&self) -> bool {
        self.state.is_connected()
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Starting,
            pairing_token: None,
        }
    }
}
