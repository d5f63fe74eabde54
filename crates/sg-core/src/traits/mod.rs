//! Core trait definitions

mod connection;
mod session;

pub use connection::{BackendConnection, BackendConnector, ShellChannel, ShellEvent, ShellInput};
pub use session::SessionState;
