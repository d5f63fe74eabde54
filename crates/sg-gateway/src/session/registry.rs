//! Session registry
//!
//! The registry is the single owner of every session record. The map itself
//! is sharded (`DashMap`); each record carries its own mutex, so work on one
//! session never serializes against another.
//!
//! # Locking
//!
//! `SessionHandle::lock` returns a guard over the mutable part of a record.
//! The guard is a `std::sync::Mutex` guard and must never be held across an
//! `.await`. Everything done under it is synchronous: inserting a viewer,
//! pushing to viewer channels, swapping the grace timer, taking the backend
//! handles out for teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use sg_core::error::SessionError;
use sg_core::time::current_time_millis;
use sg_core::traits::{BackendConnection, SessionState, ShellInput};
use sg_core::SshTarget;
use sg_protocol::{ServerEvent, SessionId};

use super::lifecycle::GraceTimer;
use super::scrollback::Scrollback;

/// Identifier of one realtime connection attached to a session
pub type ViewerId = u64;

/// Events queued per viewer before it counts as stalled
///
/// A viewer whose queue fills up is detached rather than allowed to hold
/// session output in memory.
pub const VIEWER_QUEUE_CAPACITY: usize = 1024;

/// Outbound event queue of one viewer
pub type ViewerSender = mpsc::Sender<ServerEvent>;

/// Backend handles owned by an active session
pub(crate) struct Backend {
    pub(crate) connection: Box<dyn BackendConnection>,
    pub(crate) input: mpsc::Sender<ShellInput>,
}

/// Mutable part of a session record
pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    pub(crate) viewers: HashMap<ViewerId, ViewerSender>,
    pub(crate) grace_timer: Option<GraceTimer>,
    pub(crate) backend: Option<Backend>,
    pub(crate) scrollback: Scrollback,
}

/// A registered session
pub struct SessionHandle {
    /// Session ID
    pub id: SessionId,
    /// Remote account the shell runs as
    pub target: SshTarget,
    /// Creation time (unix millis), informational
    pub created_at: u64,
    inner: Mutex<SessionInner>,
}

impl SessionHandle {
    fn new(
        id: SessionId,
        target: SshTarget,
        backend: Backend,
        scrollback_bytes: usize,
    ) -> Self {
        Self {
            id,
            target,
            created_at: current_time_millis(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                viewers: HashMap::new(),
                grace_timer: None,
                backend: Some(backend),
                scrollback: Scrollback::new(scrollback_bytes),
            }),
        }
    }

    /// Lock the mutable record
    ///
    /// A poisoned lock only means another task panicked mid-update; the
    /// record is still structurally valid, so the guard is recovered.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Number of attached viewers
    pub fn viewer_count(&self) -> usize {
        self.lock().viewers.len()
    }

    /// Whether a grace timer is pending
    pub fn has_grace_timer(&self) -> bool {
        self.lock().grace_timer.is_some()
    }

    /// Writer for the backend shell, if the session still owns one
    pub(crate) fn input(&self) -> Option<mpsc::Sender<ShellInput>> {
        self.lock().backend.as_ref().map(|b| b.input.clone())
    }
}

/// Owns all live sessions
pub struct SessionRegistry {
    /// Sessions indexed by session ID
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    /// Scrollback budget for new sessions
    scrollback_bytes: usize,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new(scrollback_bytes: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            scrollback_bytes,
        }
    }

    /// Register a session in the `Connecting` state, taking ownership of
    /// its backend handles
    pub(crate) fn create(
        &self,
        id: SessionId,
        target: SshTarget,
        connection: Box<dyn BackendConnection>,
        input: mpsc::Sender<ShellInput>,
    ) -> Result<Arc<SessionHandle>, SessionError> {
        match self.sessions.entry(id) {
            Entry::Occupied(_) => Err(SessionError::DuplicateSession(id)),
            Entry::Vacant(slot) => {
                let backend = Backend { connection, input };
                let handle = Arc::new(SessionHandle::new(
                    id,
                    target,
                    backend,
                    self.scrollback_bytes,
                ));
                slot.insert(Arc::clone(&handle));
                tracing::debug!("Registered session {}", id);
                Ok(handle)
            }
        }
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .get(&id)
            .map(|r| Arc::clone(&r))
            .ok_or(SessionError::NotFound(id))
    }

    /// Remove a session. No-op if absent.
    pub(crate) fn remove(&self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            tracing::debug!("Removed session {} from registry", id);
        }
    }

    /// Check whether a session is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sg_core::error::ShellError;
    use sg_core::traits::ShellChannel;
    use sg_protocol::TerminalSize;

    struct NullConnection;

    #[async_trait]
    impl BackendConnection for NullConnection {
        async fn open_shell(&self, _size: TerminalSize) -> Result<ShellChannel, ShellError> {
            Err(ShellError::ChannelOpen("unused".into()))
        }

        async fn close(&self) {}
    }

    fn register(registry: &SessionRegistry, id: SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        let (input, _rx) = mpsc::channel(1);
        registry.create(
            id,
            SshTarget::new("host", 22, "user"),
            Box::new(NullConnection),
            input,
        )
    }

    #[test]
    fn test_create_and_get() {
        let registry = SessionRegistry::new(1024);
        let id = SessionId::new();
        let handle = register(&registry, id).unwrap();

        assert_eq!(handle.id, id);
        assert_eq!(handle.state(), SessionState::Connecting);
        assert_eq!(handle.viewer_count(), 0);
        assert!(!handle.has_grace_timer());
        assert!(Arc::ptr_eq(&registry.get(id).unwrap(), &handle));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let registry = SessionRegistry::new(1024);
        let id = SessionId::new();
        register(&registry, id).unwrap();

        let err = register(&registry, id).err().unwrap();
        assert!(matches!(err, SessionError::DuplicateSession(dup) if dup == id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let registry = SessionRegistry::new(1024);
        let id = SessionId::new();
        assert!(matches!(registry.get(id), Err(SessionError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new(1024);
        let id = SessionId::new();
        register(&registry, id).unwrap();

        registry.remove(id);
        registry.remove(id);
        assert!(registry.is_empty());
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_input_available_until_backend_taken() {
        let registry = SessionRegistry::new(1024);
        let handle = register(&registry, SessionId::new()).unwrap();
        assert!(handle.input().is_some());

        handle.lock().backend.take();
        assert!(handle.input().is_none());
    }
}
