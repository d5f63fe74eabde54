//! Connection orchestration
//!
//! Turns a start-session request into a registered, active session:
//!
//! 1. Resolve credentials (read the staged key) before any network activity
//! 2. Connect, authenticate and open the PTY shell, all within one
//!    `connect_timeout` deadline and abandoned on shutdown
//! 3. Close the transport if the shell never came up
//! 4. Release the staged key, on success and failure alike
//! 5. Register the session, queue the banner, activate, start relaying
//!
//! Nothing is registered until the shell is open, so a failed start leaves
//! no trace in the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use sg_core::error::{ConnectionError, GatewayError};
use sg_core::traits::{BackendConnection, BackendConnector, ShellChannel};
use sg_core::{BackendAuth, SshTarget, StagedCredential};
use sg_protocol::{ServerEvent, SessionId, TerminalSize};

use crate::relay::Relay;
use crate::session::{LifecycleManager, SessionRegistry};

/// Credentials supplied with a start-session request
pub enum Credential {
    /// Password authentication
    Password(String),
    /// Private key staged on disk, consumed by `open`
    StagedKey(StagedCredential),
}

/// Opens backend shells and hands them to the registry
pub struct ConnectionOrchestrator {
    connector: Arc<dyn BackendConnector>,
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    relay: Arc<Relay>,
    connect_timeout: Duration,
    initial_size: TerminalSize,
    shutdown: CancellationToken,
}

impl ConnectionOrchestrator {
    /// Create an orchestrator
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        registry: Arc<SessionRegistry>,
        lifecycle: Arc<LifecycleManager>,
        relay: Arc<Relay>,
        connect_timeout: Duration,
        initial_size: TerminalSize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connector,
            registry,
            lifecycle,
            relay,
            connect_timeout,
            initial_size,
            shutdown,
        }
    }

    /// Start a session and return its id
    pub async fn open(
        &self,
        target: SshTarget,
        credential: Credential,
    ) -> Result<SessionId, GatewayError> {
        let (auth, staged) = match credential {
            Credential::Password(password) => (BackendAuth::Password(password), None),
            Credential::StagedKey(staged) => match staged.read().await {
                Ok(pem) => (BackendAuth::PrivateKey(pem), Some(staged)),
                Err(e) => {
                    staged.release().await;
                    return Err(ConnectionError::InvalidKey(e.to_string()).into());
                }
            },
        };

        tracing::info!("Opening {} session to {}", auth.method(), target);
        let established = self.establish(&target, auth).await;

        if let Some(staged) = staged {
            staged.release().await;
        }

        let (connection, shell) = match established {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Session to {} failed: {}", target, e);
                return Err(e);
            }
        };

        if self.shutdown.is_cancelled() {
            connection.close().await;
            return Err(shutting_down());
        }

        let id = SessionId::new();
        let handle = match self.registry.create(id, target, connection, shell.input) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Registry invariant violated: {}", e);
                return Err(e.into());
            }
        };

        self.relay
            .broadcast(id, ServerEvent::diagnostic("SSH CONNECTION ESTABLISHED"));
        self.lifecycle.activate(&handle);
        self.relay.spawn_output_pump(id, shell.events);

        Ok(id)
    }

    /// Connect, authenticate and open the shell
    ///
    /// Both steps share one deadline and race the shutdown token. A transport
    /// that came up but produced no shell is closed here.
    async fn establish(
        &self,
        target: &SshTarget,
        auth: BackendAuth,
    ) -> Result<(Box<dyn BackendConnection>, ShellChannel), GatewayError> {
        let deadline = Instant::now() + self.connect_timeout;

        let connection = tokio::select! {
            result = timeout_at(deadline, self.connector.connect(target, auth)) => {
                result.map_err(|_| ConnectionError::Timeout)??
            }
            _ = self.shutdown.cancelled() => return Err(shutting_down()),
        };

        let opened = tokio::select! {
            result = timeout_at(deadline, connection.open_shell(self.initial_size)) => match result {
                Ok(shell) => shell.map_err(GatewayError::from),
                Err(_) => Err(ConnectionError::Timeout.into()),
            },
            _ = self.shutdown.cancelled() => Err(shutting_down()),
        };

        match opened {
            Ok(shell) => Ok((connection, shell)),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }
}

fn shutting_down() -> GatewayError {
    ConnectionError::Transport("gateway shutting down".into()).into()
}
