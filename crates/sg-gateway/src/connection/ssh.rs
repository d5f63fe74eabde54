//! SSH backend built on russh
//!
//! One `RusshConnection` per session: the connector authenticates, then the
//! connection opens a single PTY-backed shell channel. The channel is moved
//! into a pump task that bridges it to the `ShellChannel` queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::sync::{mpsc, Mutex};

use sg_core::error::{ConnectionError, ShellError};
use sg_core::traits::{
    BackendConnection, BackendConnector, ShellChannel, ShellEvent, ShellInput,
};
use sg_core::{BackendAuth, SshTarget};
use sg_protocol::TerminalSize;

/// Queued viewer input per shell
///
/// Input is tiny (keystrokes, pastes); 256 entries absorb a large paste
/// split into many frames without stalling the relay.
const SHELL_INPUT_CAPACITY: usize = 256;

/// Queued output chunks per shell before the pump waits on the relay
const SHELL_EVENT_CAPACITY: usize = 256;

/// Terminal type announced in the PTY request
const TERM: &str = "xterm";

/// Connects to SSH servers with password or private-key authentication
pub struct RusshConnector {
    config: Arc<Config>,
}

impl RusshConnector {
    /// Create a connector with russh defaults
    pub fn new() -> Self {
        Self {
            config: Arc::new(Config::default()),
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

enum Method {
    Password(String),
    Key(Arc<KeyPair>),
}

#[async_trait]
impl BackendConnector for RusshConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        auth: BackendAuth,
    ) -> Result<Box<dyn BackendConnection>, ConnectionError> {
        // Decode the key before touching the network
        let method = match auth {
            BackendAuth::Password(password) => Method::Password(password),
            BackendAuth::PrivateKey(pem) => {
                let key = russh_keys::decode_secret_key(&pem, None)
                    .map_err(|e| ConnectionError::InvalidKey(e.to_string()))?;
                Method::Key(Arc::new(key))
            }
        };

        tracing::debug!("Connecting to {}", target);
        let handler = ClientHandler {
            target: target.to_string(),
        };
        let mut session = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        .map_err(classify_connect_error)?;

        let authenticated = match method {
            Method::Password(password) => {
                session
                    .authenticate_password(target.username.as_str(), password)
                    .await
            }
            Method::Key(key) => {
                session
                    .authenticate_publickey(target.username.as_str(), key)
                    .await
            }
        }
        .map_err(|e| ConnectionError::Transport(format!("Authentication error: {}", e)))?;

        if !authenticated {
            tracing::debug!("Authentication rejected for {}", target);
            let _ = session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(ConnectionError::AuthenticationFailed);
        }

        tracing::debug!("Authenticated to {}", target);
        Ok(Box::new(RusshConnection {
            handle: Mutex::new(session),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Map a failed `client::connect` onto the connection taxonomy
fn classify_connect_error(err: anyhow::Error) -> ConnectionError {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return ConnectionError::ConnectionRefused(io.to_string());
    }
    if let Some(russh::Error::IO(io)) = err.downcast_ref::<russh::Error>() {
        return ConnectionError::ConnectionRefused(io.to_string());
    }
    ConnectionError::Transport(err.to_string())
}

/// An authenticated SSH transport
struct RusshConnection {
    handle: Mutex<Handle<ClientHandler>>,
    closed: AtomicBool,
}

#[async_trait]
impl BackendConnection for RusshConnection {
    async fn open_shell(&self, size: TerminalSize) -> Result<ShellChannel, ShellError> {
        let mut channel = {
            let handle = self.handle.lock().await;
            handle
                .channel_open_session()
                .await
                .map_err(|e| ShellError::ChannelOpen(e.to_string()))?
        };

        let mut early = Vec::new();

        channel
            .request_pty(
                true,
                TERM,
                u32::from(size.cols),
                u32::from(size.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| ShellError::PtyRequest(e.to_string()))?;
        await_reply(&mut channel, &mut early)
            .await
            .map_err(ShellError::PtyRequest)?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| ShellError::ShellRequest(e.to_string()))?;
        await_reply(&mut channel, &mut early)
            .await
            .map_err(ShellError::ShellRequest)?;

        tracing::debug!("Shell open ({}x{})", size.cols, size.rows);

        let (input_tx, input_rx) = mpsc::channel(SHELL_INPUT_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(SHELL_EVENT_CAPACITY);
        tokio::spawn(pump(channel, early, input_rx, events_tx));

        Ok(ShellChannel {
            input: input_tx,
            events: events_rx,
        })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = self.handle.lock().await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            tracing::debug!("Disconnect failed (transport already gone?): {}", e);
        }
    }
}

/// Wait for the server's answer to a channel request
///
/// Output that races ahead of the reply is kept for the pump.
async fn await_reply(channel: &mut Channel<Msg>, early: &mut Vec<Bytes>) -> Result<(), String> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => return Err("request refused by server".to_string()),
            Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                early.push(Bytes::copy_from_slice(&data));
            }
            Some(ChannelMsg::Close) | None => return Err("channel closed".to_string()),
            Some(other) => {
                tracing::trace!("Ignoring {:?} while awaiting reply", other);
            }
        }
    }
}

/// Bridge a shell channel to the relay queues until either side goes away
async fn pump(
    mut channel: Channel<Msg>,
    early: Vec<Bytes>,
    mut input: mpsc::Receiver<ShellInput>,
    events: mpsc::Sender<ShellEvent>,
) {
    for chunk in early {
        if events.send(ShellEvent::Output(chunk)).await.is_err() {
            return;
        }
    }

    let mut exit_status = None;
    let mut input_open = true;

    let last = loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    let chunk = Bytes::copy_from_slice(&data);
                    if events.send(ShellEvent::Output(chunk)).await.is_err() {
                        // Session is gone; nobody to report to
                        return;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status);
                }
                Some(ChannelMsg::Eof) => {
                    tracing::debug!("Remote shell sent EOF");
                }
                Some(ChannelMsg::Close) | None => {
                    break ShellEvent::Closed { exit_status };
                }
                Some(_) => {}
            },
            cmd = input.recv(), if input_open => match cmd {
                Some(ShellInput::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        break ShellEvent::Failed(e.to_string());
                    }
                }
                Some(ShellInput::Resize(size)) => {
                    if let Err(e) = channel
                        .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
                        .await
                    {
                        tracing::warn!("Window change failed: {}", e);
                    }
                }
                None => {
                    input_open = false;
                    let _ = channel.eof().await;
                }
            }
        }
    };

    let _ = events.send(last).await;
}

/// russh client callbacks
struct ClientHandler {
    target: String,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    /// Host keys are accepted and logged; the gateway has no known_hosts
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Host key for {}: {}",
            self.target,
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}
