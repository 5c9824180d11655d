//! Session state and the connection lifecycle supervisor.

pub mod state;
pub mod supervisor;

pub use state::{ConnectionState, SessionStatus};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError, SupervisorHandle};
