//! # wabot-core
//!
//! Core business logic for wabot, a single-account messaging bot daemon.
//!
//! This crate is framework-agnostic and can be used by:
//! - The headless daemon (HTTP status/pairing surface)
//! - Integration tests driving the supervisor with fake transports
//!
//! ## Key Concepts
//!
//! - **Session**: the logical, possibly-reconnecting link between this
//!   process and the remote messaging service for one account
//! - **Supervisor**: owns at most one live transport at a time and decides
//!   when to replace it (pairing rotation, backoff reconnects, logout)
//! - **Transport**: the underlying connection object, consumed through the
//!   [`transport::TransportFactory`] trait so tests can substitute fakes

pub mod creds;
pub mod gateway;
pub mod message;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use creds::{CredentialBundle, CredentialStore, FileCredentialStore};
pub use session::{ConnectionState, SessionStatus, Supervisor, SupervisorHandle};
pub use transport::{TransportEvent, TransportFactory, TransportHandle};
