//! Session lifecycle and grace-period teardown
//!
//! A session is released either when its backend goes away or when it has
//! had no viewers for a full grace period. The grace period lets a browser
//! reload or briefly lose its connection without killing the remote shell.
//!
//! # State Machine
//!
//! ```text
//!              activate
//! Connecting ───────────▶ Active(0, timer) ◀──── last viewer leaves
//!                             │     ▲
//!                 viewer joins│     │
//!                             ▼     │
//!                         Active(n > 0)
//!
//! any state ── timer fires with 0 viewers / backend error / backend end ──▶ Terminated
//! ```
//!
//! A grace timer exists exactly when the session is `Active` with zero
//! viewers. Each timer carries a generation number; a timer that fires after
//! it was replaced or cancelled sees a different generation under the session
//! lock and does nothing. Teardown runs at most once per session.
//!
//! A viewer whose bounded queue is full when an event is delivered is
//! evicted on the spot, exactly as if it had left.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use sg_core::error::SessionError;
use sg_core::time::elapsed_millis;
use sg_core::traits::SessionState;
use sg_protocol::{ServerEvent, SessionId};

use super::registry::{SessionHandle, SessionInner, SessionRegistry, ViewerId, ViewerSender};

/// Pending grace-period expiry; cancelled when dropped
pub(crate) struct GraceTimer {
    generation: u64,
    cancel: CancellationToken,
}

impl Drop for GraceTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a session is being torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// No viewer rejoined within the grace period
    GraceExpired,
    /// The remote shell exited or the transport closed cleanly
    BackendClosed {
        /// Exit status reported by the remote, if any
        exit_status: Option<u32>,
    },
    /// The transport failed mid-session
    BackendError(String),
    /// The gateway process is stopping
    Shutdown,
}

impl TerminationReason {
    /// Diagnostic shown to viewers still attached at teardown
    fn diagnostic(&self) -> Option<ServerEvent> {
        match self {
            TerminationReason::GraceExpired => None,
            TerminationReason::BackendClosed { .. } => {
                Some(ServerEvent::diagnostic("SSH SESSION CLOSED"))
            }
            TerminationReason::BackendError(message) => Some(ServerEvent::diagnostic(format!(
                "SSH CONNECTION ERROR: {}",
                message
            ))),
            TerminationReason::Shutdown => Some(ServerEvent::diagnostic("GATEWAY SHUTTING DOWN")),
        }
    }
}

/// Drives session state transitions
pub struct LifecycleManager {
    registry: Arc<SessionRegistry>,
    grace_period: Duration,
    next_generation: AtomicU64,
}

impl LifecycleManager {
    /// Create a lifecycle manager over `registry`
    pub fn new(registry: Arc<SessionRegistry>, grace_period: Duration) -> Self {
        Self {
            registry,
            grace_period,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Configured grace period
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Move a freshly registered session into `Active`
    ///
    /// The session has no viewers yet, so its grace timer starts now: a
    /// session whose redirect is never followed still gets released.
    pub(crate) fn activate(self: &Arc<Self>, handle: &SessionHandle) -> bool {
        let mut inner = handle.lock();
        if inner.state != SessionState::Connecting {
            return false;
        }

        inner.state = SessionState::Active;
        if inner.viewers.is_empty() {
            self.start_grace_timer(handle.id, &mut inner);
        }

        tracing::info!("Session {} active ({})", handle.id, handle.target);
        true
    }

    /// Attach a viewer, replaying retained output to it first
    ///
    /// Returns the new viewer count.
    pub(crate) fn attach(
        &self,
        id: SessionId,
        viewer: ViewerId,
        tx: ViewerSender,
    ) -> Result<usize, SessionError> {
        let handle = self.registry.get(id)?;
        let mut inner = handle.lock();

        if !inner.state.accepts_viewers() {
            return Err(SessionError::NotFound(id));
        }

        if !inner.scrollback.is_empty() {
            // Fresh queue; the replay always fits
            let _ = tx.try_send(ServerEvent::Data(inner.scrollback.snapshot()));
        }
        inner.viewers.insert(viewer, tx);

        if inner.grace_timer.take().is_some() {
            tracing::debug!("Viewer rejoined session {}, grace timer cancelled", id);
        }

        let count = inner.viewers.len();
        tracing::info!("Viewer {} joined session {} ({} attached)", viewer, id, count);
        Ok(count)
    }

    /// Detach a viewer; the last one out starts the grace timer
    ///
    /// Returns the remaining viewer count, or `None` if the session is gone.
    pub(crate) fn detach(self: &Arc<Self>, id: SessionId, viewer: ViewerId) -> Option<usize> {
        let handle = self.registry.get(id).ok()?;
        let mut inner = handle.lock();

        if inner.viewers.remove(&viewer).is_none() {
            return Some(inner.viewers.len());
        }

        let count = inner.viewers.len();
        tracing::info!("Viewer {} left session {} ({} attached)", viewer, id, count);
        self.after_viewer_removed(id, &mut inner);

        Some(count)
    }

    /// Queue `event` for every viewer of a locked, live session
    ///
    /// Viewers whose queue is full are evicted; dropping their sender ends
    /// their stream once the already queued events are consumed.
    pub(crate) fn deliver(
        self: &Arc<Self>,
        id: SessionId,
        inner: &mut SessionInner,
        event: &ServerEvent,
    ) {
        let mut stalled = Vec::new();
        for (viewer, tx) in &inner.viewers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => stalled.push(*viewer),
                // Socket already gone; its leave is on the way
                Err(TrySendError::Closed(_)) => {}
            }
        }

        if stalled.is_empty() {
            return;
        }

        for viewer in stalled {
            inner.viewers.remove(&viewer);
            tracing::warn!(
                "Viewer {} of session {} is not keeping up, detached ({} attached)",
                viewer,
                id,
                inner.viewers.len()
            );
        }
        self.after_viewer_removed(id, inner);
    }

    fn after_viewer_removed(self: &Arc<Self>, id: SessionId, inner: &mut SessionInner) {
        if inner.viewers.is_empty()
            && inner.state == SessionState::Active
            && inner.grace_timer.is_none()
        {
            self.start_grace_timer(id, inner);
        }
    }

    /// Tear a session down immediately
    ///
    /// Returns `false` if the session was already gone or terminated.
    pub async fn terminate(&self, id: SessionId, reason: TerminationReason) -> bool {
        match self.registry.get(id) {
            Ok(handle) => self.teardown(&handle, reason, None).await,
            Err(_) => false,
        }
    }

    /// Terminate every registered session
    pub async fn shutdown_all(&self) {
        let sessions = self.registry.list();
        if sessions.is_empty() {
            return;
        }

        tracing::info!("Terminating {} sessions", sessions.len());
        for handle in sessions {
            self.teardown(&handle, TerminationReason::Shutdown, None).await;
        }
    }

    fn start_grace_timer(self: &Arc<Self>, id: SessionId, inner: &mut SessionInner) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let manager = Arc::clone(self);
        let grace = self.grace_period;
        let deadline = tokio::time::Instant::now() + grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    manager.grace_expired(id, generation).await;
                }
                _ = token.cancelled() => {}
            }
        });

        inner.grace_timer = Some(GraceTimer { generation, cancel });
        tracing::debug!("Grace timer started for session {} ({:?})", id, grace);
    }

    async fn grace_expired(&self, id: SessionId, generation: u64) {
        if let Ok(handle) = self.registry.get(id) {
            self.teardown(&handle, TerminationReason::GraceExpired, Some(generation))
                .await;
        }
    }

    /// Single teardown path
    ///
    /// Under the session lock: check the session is still live (and, for a
    /// timer firing, that the timer is still current), mark it terminated,
    /// notify viewers, take the backend handles. Only then is the registry
    /// entry removed and the transport closed.
    async fn teardown(
        &self,
        handle: &SessionHandle,
        reason: TerminationReason,
        timer_generation: Option<u64>,
    ) -> bool {
        let (backend, viewers) = {
            let mut inner = handle.lock();
            if inner.state.is_terminal() {
                return false;
            }

            if let Some(generation) = timer_generation {
                let current = inner.grace_timer.as_ref().map(|t| t.generation);
                if current != Some(generation) || !inner.viewers.is_empty() {
                    return false;
                }
            }

            inner.state = SessionState::Terminated;
            inner.grace_timer = None;

            if let Some(event) = reason.diagnostic() {
                for tx in inner.viewers.values() {
                    // A full queue is dropped below anyway
                    let _ = tx.try_send(event.clone());
                }
            }

            inner.scrollback.clear();
            (inner.backend.take(), std::mem::take(&mut inner.viewers))
        };

        self.registry.remove(handle.id);

        // Dropping the senders ends each viewer's event stream, which closes
        // its socket after the diagnostic is flushed.
        let viewer_count = viewers.len();
        drop(viewers);

        if let Some(backend) = backend {
            drop(backend.input);
            backend.connection.close().await;
        }

        tracing::info!(
            "Session {} terminated: {:?} ({} viewers detached, lived {}ms)",
            handle.id,
            reason,
            viewer_count,
            elapsed_millis(handle.created_at)
        );
        true
    }
}
