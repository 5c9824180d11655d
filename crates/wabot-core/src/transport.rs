//! Transport collaborator contract.
//!
//! A transport is one live connection to the remote messaging service. The
//! supervisor never talks to a socket directly; it receives [`TransportEvent`]s
//! on a channel and issues [`TransportCommand`]s through a [`TransportHandle`].
//!
//! # Delivery contract
//!
//! A transport delivers its events strictly sequentially, never concurrently,
//! and ends its stream with exactly one closed lifecycle update. The
//! supervisor is additionally idempotent against duplicate `connected`/`closed`
//! signals, but implementors should not rely on that.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::creds::CredentialBundle;
use crate::message::MessageEnvelope;

/// Close status the remote service uses for an invalidated login.
///
/// Matches the service's "logged out" disconnect reason (HTTP-style 401).
pub const STATUS_LOGGED_OUT: u16 = 401;

/// Why a transport went away, as far as the supervisor cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Credentials are no longer valid; reconnecting with them is pointless.
    AuthTerminal,
    /// Network or transport failure; reconnecting may succeed.
    Recoverable,
}

/// Status attached to a closed lifecycle update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseStatus {
    /// Status code reported by the remote service, if any.
    pub code: Option<u16>,
}

impl CloseStatus {
    /// Classify the close. An unrecognized or missing code is recoverable.
    pub fn reason(&self) -> DisconnectReason {
        match self.code {
            Some(STATUS_LOGGED_OUT) => DisconnectReason::AuthTerminal,
            _ => DisconnectReason::Recoverable,
        }
    }
}

/// Connection lifecycle update, mirroring the remote `connection.update`
/// shape: an optional fresh pairing token, an optional "now open" signal and
/// an optional "now closed" signal. A single update may carry several.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LifecycleUpdate {
    /// Fresh pairing (QR) token issued because no valid credentials exist.
    pub pairing_token: Option<String>,
    /// The session is now authenticated and live.
    pub connected: bool,
    /// The transport has terminated.
    pub closed: Option<CloseStatus>,
}

impl LifecycleUpdate {
    /// Update carrying a fresh pairing token.
    pub fn pairing(token: impl Into<String>) -> Self {
        Self {
            pairing_token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Update signalling the session is open.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    /// Update signalling the transport has terminated.
    pub fn closed(status: CloseStatus) -> Self {
        Self {
            closed: Some(status),
            ..Self::default()
        }
    }
}

/// Event emitted by a live transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection lifecycle change.
    Lifecycle(LifecycleUpdate),
    /// New or rotated credential material to persist.
    Credentials(CredentialBundle),
    /// Inbound message from some conversation.
    Message(MessageEnvelope),
}

/// Command issued to a live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Send a plain-text message to a conversation.
    SendText { chat_id: String, text: String },
    /// Perform a protocol-level logout; the service will close the
    /// connection with [`STATUS_LOGGED_OUT`] once it takes effect.
    Logout,
    /// Tear the connection down without touching the remote login.
    Terminate,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is no longer running")]
    Closed,

    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
}

/// Handle to one live transport instance.
///
/// Commands are fire-and-forget: they fail only when the transport task has
/// already exited, in which case a closed lifecycle update is on its way.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
}

impl TransportHandle {
    pub fn new(commands: mpsc::UnboundedSender<TransportCommand>) -> Self {
        Self { commands }
    }

    /// Send a plain-text message to a conversation.
    pub fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        self.command(TransportCommand::SendText {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        })
    }

    /// Request a protocol-level logout.
    pub fn logout(&self) -> Result<(), TransportError> {
        self.command(TransportCommand::Logout)
    }

    /// Tear the connection down.
    pub fn terminate(&self) -> Result<(), TransportError> {
        self.command(TransportCommand::Terminate)
    }

    fn command(&self, command: TransportCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::Closed)
    }
}

/// Creates transport instances bound to a credential bundle.
///
/// `create` must not block: implementations spawn their connection task and
/// report dial failures as a recoverable closed update on `events`.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        creds: Option<CredentialBundle>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<TransportHandle, TransportError>;
}
