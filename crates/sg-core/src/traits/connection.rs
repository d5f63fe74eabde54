//! Backend transport traits
//!
//! The gateway never speaks SSH itself. A `BackendConnector` establishes an
//! authenticated transport; the resulting `BackendConnection` opens one
//! interactive shell whose byte streams are exposed as a pair of channels.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ConnectionError, ShellError};
use crate::types::{BackendAuth, SshTarget};
use sg_protocol::TerminalSize;

/// Input accepted by an open shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    /// Keystrokes / pasted text, written verbatim
    Data(Bytes),
    /// Window size change
    Resize(TerminalSize),
}

/// Events produced by an open shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// Output bytes (stdout and stderr interleaved)
    Output(Bytes),
    /// The remote side closed the shell
    Closed {
        /// Exit status if the server reported one
        exit_status: Option<u32>,
    },
    /// Transport failed while the shell was open
    Failed(String),
}

/// An interactive shell bound to a backend connection
///
/// Dropping `input` asks the backend to send EOF; `events` ends after the
/// final `Closed` or `Failed`.
#[derive(Debug)]
pub struct ShellChannel {
    /// Writer half
    pub input: mpsc::Sender<ShellInput>,
    /// Reader half
    pub events: mpsc::Receiver<ShellEvent>,
}

/// Establishes authenticated backend connections
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Connect and authenticate
    async fn connect(
        &self,
        target: &SshTarget,
        auth: BackendAuth,
    ) -> Result<Box<dyn BackendConnection>, ConnectionError>;
}

/// An authenticated transport to a remote host
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Open an interactive shell with a PTY of the given size
    async fn open_shell(&self, size: TerminalSize) -> Result<ShellChannel, ShellError>;

    /// Close the transport. Idempotent.
    async fn close(&self);
}
