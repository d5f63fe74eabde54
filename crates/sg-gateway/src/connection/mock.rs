//! Scriptable in-process backend
//!
//! `MockConnector` stands in for an SSH server in tests. Each successful
//! `connect` produces a `MockShell`, the test's end of the remote shell: it
//! can emit output, exit, fail, and observe what the gateway wrote.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use sg_core::error::{ConnectionError, ShellError};
use sg_core::traits::{
    BackendConnection, BackendConnector, ShellChannel, ShellEvent, ShellInput,
};
use sg_core::{BackendAuth, SshTarget};
use sg_protocol::TerminalSize;

const MOCK_CHANNEL_CAPACITY: usize = 64;

/// How the next connection attempts behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Authenticate and open shells
    Accept,
    /// Reject the credentials
    RejectAuth,
    /// Host unreachable
    Refuse,
    /// Transport comes up but no shell can be opened
    ShellUnavailable,
    /// Never answer (exercises the connect timeout)
    Hang,
    /// Transport comes up but the shell request is never answered
    HangShell,
}

/// A recorded connection attempt
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    /// Where the gateway tried to connect
    pub target: SshTarget,
    /// Credentials it presented
    pub auth: BackendAuth,
}

struct ConnectorState {
    behavior: MockBehavior,
    attempts: Vec<ConnectAttempt>,
    shells: Vec<MockShell>,
}

/// In-process `BackendConnector`; clones share state
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// Connector that accepts every attempt
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Accept)
    }

    /// Connector with the given behavior
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState {
                behavior,
                attempts: Vec::new(),
                shells: Vec::new(),
            })),
        }
    }

    /// Change behavior for subsequent attempts
    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.lock().behavior = behavior;
    }

    /// Every connection attempt so far
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.lock().attempts.clone()
    }

    /// Backend of the most recent transport that came up
    pub fn last_shell(&self) -> Option<MockShell> {
        self.lock().shells.last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        auth: BackendAuth,
    ) -> Result<Box<dyn BackendConnection>, ConnectionError> {
        let behavior = {
            let mut state = self.lock();
            state.attempts.push(ConnectAttempt {
                target: target.clone(),
                auth,
            });
            state.behavior
        };

        match behavior {
            MockBehavior::RejectAuth => return Err(ConnectionError::AuthenticationFailed),
            MockBehavior::Refuse => {
                return Err(ConnectionError::ConnectionRefused(format!(
                    "{}:{} unreachable",
                    target.host, target.port
                )))
            }
            MockBehavior::Hang => std::future::pending::<()>().await,
            MockBehavior::Accept | MockBehavior::ShellUnavailable | MockBehavior::HangShell => {}
        }

        let shell = MockShell::default();
        self.lock().shells.push(shell.clone());

        Ok(Box::new(MockConnection { shell, behavior }))
    }
}

struct MockConnection {
    shell: MockShell,
    behavior: MockBehavior,
}

#[async_trait]
impl BackendConnection for MockConnection {
    async fn open_shell(&self, size: TerminalSize) -> Result<ShellChannel, ShellError> {
        match self.behavior {
            MockBehavior::ShellUnavailable => {
                return Err(ShellError::ChannelOpen("administratively prohibited".into()));
            }
            MockBehavior::HangShell => std::future::pending::<()>().await,
            _ => {}
        }

        let (input_tx, input_rx) = mpsc::channel(MOCK_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(MOCK_CHANNEL_CAPACITY);

        let inner = &self.shell.inner;
        *lock(&inner.events) = Some(events_tx);
        *inner.input.lock().await = Some(input_rx);
        *lock(&inner.pty_size) = Some(size);

        Ok(ShellChannel {
            input: input_tx,
            events: events_rx,
        })
    }

    async fn close(&self) {
        let inner = &self.shell.inner;
        inner.closes.fetch_add(1, Ordering::SeqCst);
        lock(&inner.events).take();
    }
}

#[derive(Default)]
struct ShellState {
    events: Mutex<Option<mpsc::Sender<ShellEvent>>>,
    input: tokio::sync::Mutex<Option<mpsc::Receiver<ShellInput>>>,
    pty_size: Mutex<Option<TerminalSize>>,
    closes: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The remote end of one mock transport
#[derive(Clone, Default)]
pub struct MockShell {
    inner: Arc<ShellState>,
}

impl MockShell {
    /// Emit shell output. Returns `false` once the shell is closed.
    pub async fn output(&self, data: impl AsRef<[u8]>) -> bool {
        self.emit(ShellEvent::Output(Bytes::copy_from_slice(data.as_ref())))
            .await
    }

    /// The remote shell exits
    pub async fn exit(&self, exit_status: Option<u32>) {
        self.emit(ShellEvent::Closed { exit_status }).await;
        lock(&self.inner.events).take();
    }

    /// The transport fails mid-session
    pub async fn fail(&self, message: &str) {
        self.emit(ShellEvent::Failed(message.to_string())).await;
        lock(&self.inner.events).take();
    }

    /// Next input written by the gateway, `None` once every writer is gone
    pub async fn next_input(&self) -> Option<ShellInput> {
        let mut input = self.inner.input.lock().await;
        match input.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Drain input until every writer is gone
    ///
    /// Returns `false` if no shell was ever opened on this transport.
    pub async fn input_closed(&self) -> bool {
        let mut input = self.inner.input.lock().await;
        match input.as_mut() {
            Some(rx) => {
                while rx.recv().await.is_some() {}
                true
            }
            None => false,
        }
    }

    /// PTY size requested when the shell was opened
    pub fn pty_size(&self) -> Option<TerminalSize> {
        *lock(&self.inner.pty_size)
    }

    /// How many times the gateway closed this transport
    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: ShellEvent) -> bool {
        let tx = lock(&self.inner.events).clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}
