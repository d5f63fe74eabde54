//! Realtime relay between viewers and backend shells
//!
//! The relay never keeps a session handle between calls: every operation
//! resolves the session id through the registry, so a terminated session
//! simply stops being found.
//!
//! # Fan-out
//!
//! Each viewer owns a bounded event queue. Backend output is pushed into
//! every queue of the session while the session lock is held, which gives
//! each chunk one consistent viewer set and keeps emission order intact.
//! Pushing never waits: a viewer whose queue is full is detached instead,
//! so one stalled browser cannot hold back the others or grow memory.
//! Scrollback is appended under the same lock, so a viewer joining mid-stream
//! sees the replay followed by exactly the chunks that came after it.

mod socket;

pub use socket::{serve_viewer, ws_handler};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

use sg_core::error::GatewayError;
use sg_core::traits::{ShellEvent, ShellInput};
use sg_core::TokenService;
use sg_protocol::{ServerEvent, SessionId, TerminalSize, Utf8Chunker};

use crate::session::{
    LifecycleManager, SessionRegistry, TerminationReason, ViewerId, VIEWER_QUEUE_CAPACITY,
};

/// A viewer attached by a successful `join`
#[derive(Debug)]
pub struct JoinedViewer {
    /// Session resolved from the token; fixed for the connection's lifetime
    pub session_id: SessionId,
    /// This viewer's id within the session
    pub viewer_id: ViewerId,
    /// Events for this viewer; ends when the session terminates
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Per-session fan-out and fan-in
pub struct Relay {
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    tokens: Arc<TokenService>,
    next_viewer: AtomicU64,
}

impl Relay {
    /// Create a relay
    pub fn new(
        registry: Arc<SessionRegistry>,
        lifecycle: Arc<LifecycleManager>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            tokens,
            next_viewer: AtomicU64::new(0),
        }
    }

    /// Authorize a token and attach a new viewer to its session
    ///
    /// The token is verified before any registry access. On success the new
    /// viewer's queue holds the scrollback replay followed by a
    /// `requestTerminalSize` prompt.
    pub fn join(&self, token: &str) -> Result<JoinedViewer, GatewayError> {
        let session_id = self.tokens.verify(token)?;

        let viewer_id = self.next_viewer.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, events) = mpsc::channel(VIEWER_QUEUE_CAPACITY);

        self.lifecycle.attach(session_id, viewer_id, tx.clone())?;
        let _ = tx.try_send(ServerEvent::RequestTerminalSize);

        Ok(JoinedViewer {
            session_id,
            viewer_id,
            events,
        })
    }

    /// Forward viewer input verbatim to the backend shell
    ///
    /// Input for a session that is gone or no longer writable is logged and
    /// dropped.
    pub async fn data(&self, session_id: SessionId, data: String) {
        let Some(input) = self.backend_input(session_id) else {
            tracing::warn!("Dropping input for unavailable session {}", session_id);
            return;
        };

        tracing::trace!("{} bytes of input for session {}", data.len(), session_id);
        if input.send(ShellInput::Data(Bytes::from(data))).await.is_err() {
            tracing::warn!("Backend stream of session {} is closed, input dropped", session_id);
        }
    }

    /// Forward a terminal size change to the backend shell
    pub async fn resize(&self, session_id: SessionId, size: TerminalSize) {
        if !size.is_valid() {
            tracing::debug!("Ignoring invalid size {}x{} for session {}", size.cols, size.rows, session_id);
            return;
        }

        let Some(input) = self.backend_input(session_id) else {
            return;
        };

        if input.send(ShellInput::Resize(size)).await.is_err() {
            tracing::debug!("Resize for closed session {} dropped", session_id);
        }
    }

    /// Detach a viewer whose connection ended
    pub fn leave(&self, session_id: SessionId, viewer_id: ViewerId) {
        self.lifecycle.detach(session_id, viewer_id);
    }

    /// Send an event to every viewer of a session, recording output in its
    /// scrollback
    pub fn broadcast(&self, session_id: SessionId, event: ServerEvent) {
        let Ok(handle) = self.registry.get(session_id) else {
            return;
        };

        let mut inner = handle.lock();
        if inner.state.is_terminal() {
            return;
        }

        if let ServerEvent::Data(text) = &event {
            inner.scrollback.push(text);
        }

        self.lifecycle.deliver(session_id, &mut inner, &event);
    }

    /// Relay backend output to viewers until the shell ends, then terminate
    /// the session
    pub fn spawn_output_pump(
        self: &Arc<Self>,
        session_id: SessionId,
        events: mpsc::Receiver<ShellEvent>,
    ) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move { relay.pump_output(session_id, events).await })
    }

    async fn pump_output(&self, session_id: SessionId, mut events: mpsc::Receiver<ShellEvent>) {
        let mut chunker = Utf8Chunker::new();
        let mut pending = BytesMut::new();

        let reason = loop {
            match events.recv().await {
                Some(ShellEvent::Output(bytes)) => {
                    tracing::trace!("{} bytes of output for session {}", bytes.len(), session_id);
                    pending.extend_from_slice(&bytes);
                    // Invalid bytes decode to U+FFFD, so the chunker never errors
                    while let Ok(Some(text)) = chunker.decode(&mut pending) {
                        self.broadcast(session_id, ServerEvent::Data(text));
                    }
                }
                Some(ShellEvent::Closed { exit_status }) => {
                    break TerminationReason::BackendClosed { exit_status };
                }
                Some(ShellEvent::Failed(message)) => {
                    break TerminationReason::BackendError(message);
                }
                None => break TerminationReason::BackendClosed { exit_status: None },
            }
        };

        if let Ok(Some(rest)) = chunker.decode_eof(&mut pending) {
            self.broadcast(session_id, ServerEvent::Data(rest));
        }

        self.lifecycle.terminate(session_id, reason).await;
    }

    fn backend_input(&self, session_id: SessionId) -> Option<mpsc::Sender<ShellInput>> {
        self.registry.get(session_id).ok()?.input()
    }
}
