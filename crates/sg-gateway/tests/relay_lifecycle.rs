//! Relay and session lifecycle integration tests
//!
//! Sessions are opened through the orchestrator against the mock backend;
//! viewers attach through the relay. Grace timers run on paused time.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

use sg_core::config::GatewayConfig;
use sg_core::error::{AuthError, ConnectionError, GatewayError, SessionError};
use sg_core::traits::{SessionState, ShellInput};
use sg_core::SshTarget;
use sg_gateway::connection::mock::{MockBehavior, MockConnector, MockShell};
use sg_gateway::connection::Credential;
use sg_gateway::relay::JoinedViewer;
use sg_gateway::session::{TerminationReason, VIEWER_QUEUE_CAPACITY};
use sg_gateway::GatewayState;
use sg_protocol::{ServerEvent, SessionId};

const GRACE: Duration = Duration::from_secs(60);
const SECRET: &str = "relay-secret";

struct Gateway {
    state: Arc<GatewayState>,
    connector: MockConnector,
}

fn gateway() -> Gateway {
    let config = GatewayConfig {
        token_secret: Some(SECRET.into()),
        grace_period: GRACE,
        staging_dir: std::env::temp_dir().join("shellgate-relay-tests"),
        ..Default::default()
    };
    let connector = MockConnector::new();
    let state = GatewayState::new(
        config,
        Arc::new(connector.clone()),
        CancellationToken::new(),
    )
    .unwrap();
    Gateway {
        state: Arc::new(state),
        connector,
    }
}

impl Gateway {
    /// Open a session and return its id, a token for it and the remote shell
    async fn open(&self) -> (SessionId, String, MockShell) {
        let id = self
            .state
            .orchestrator
            .open(SshTarget::new("h", 22, "u"), Credential::Password("p".into()))
            .await
            .unwrap();
        let token = self.state.tokens.issue(id, self.state.config.token_ttl);
        (id, token, self.connector.last_shell().unwrap())
    }

    fn join(&self, token: &str) -> JoinedViewer {
        self.state.relay.join(token).unwrap()
    }

    fn viewer_count(&self, id: SessionId) -> usize {
        self.state.registry.get(id).unwrap().viewer_count()
    }

    fn has_grace_timer(&self, id: SessionId) -> bool {
        self.state.registry.get(id).unwrap().has_grace_timer()
    }
}

/// A correctly signed token for `id` that expired ten seconds ago
fn expired_token(id: SessionId) -> String {
    let claims = json!({
        "sessionId": id.to_string(),
        "exp": sg_core::time::current_time_secs() - 10,
    });
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Next `data` payload, skipping size prompts
async fn next_text(events: &mut Receiver<ServerEvent>) -> String {
    loop {
        match events.recv().await {
            Some(ServerEvent::Data(text)) => return text,
            Some(ServerEvent::RequestTerminalSize) => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
}

/// Let spawned tasks run until `done` holds
async fn settle(done: impl Fn() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_join_then_input_reaches_backend() {
    let gw = gateway();
    let (id, token, shell) = gw.open().await;
    assert!(gw.has_grace_timer(id));

    let mut viewer = gw.join(&token);
    assert_eq!(viewer.session_id, id);
    assert_eq!(gw.viewer_count(id), 1);
    assert!(!gw.has_grace_timer(id));

    // Banner replay, then the size prompt
    assert!(next_text(&mut viewer.events)
        .await
        .contains("SSH CONNECTION ESTABLISHED"));
    assert!(matches!(
        viewer.events.recv().await,
        Some(ServerEvent::RequestTerminalSize)
    ));

    gw.state.relay.data(id, "ls\n".to_string()).await;
    assert_eq!(
        shell.next_input().await,
        Some(ShellInput::Data(Bytes::from_static(b"ls\n")))
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_within_grace_keeps_session() {
    let gw = gateway();
    let (id, token, _shell) = gw.open().await;

    let first = gw.join(&token);
    gw.state.relay.leave(id, first.viewer_id);
    assert_eq!(gw.viewer_count(id), 0);
    assert!(gw.has_grace_timer(id));

    tokio::time::advance(GRACE / 2).await;
    let _second = gw.join(&token);
    assert!(!gw.has_grace_timer(id));

    tokio::time::advance(GRACE * 2).await;
    tokio::task::yield_now().await;
    assert_eq!(
        gw.state.registry.get(id).unwrap().state(),
        SessionState::Active
    );
}

#[tokio::test(start_paused = true)]
async fn test_grace_expiry_terminates_session() {
    let gw = gateway();
    let (id, token, shell) = gw.open().await;

    let viewer = gw.join(&token);
    gw.state.relay.leave(id, viewer.viewer_id);

    tokio::time::advance(GRACE + Duration::from_secs(1)).await;
    let registry = Arc::clone(&gw.state.registry);
    settle(|| !registry.contains(id)).await;

    assert_eq!(shell.close_count(), 1);
    assert!(shell.input_closed().await);

    let err = gw.state.relay.join(&token).unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Session(SessionError::NotFound(gone)) if gone == id
    ));
}

#[tokio::test(start_paused = true)]
async fn test_last_viewer_out_starts_one_timer() {
    let gw = gateway();
    let (id, token, _shell) = gw.open().await;

    let a = gw.join(&token);
    let b = gw.join(&token);
    assert_eq!(gw.viewer_count(id), 2);

    gw.state.relay.leave(id, a.viewer_id);
    assert!(!gw.has_grace_timer(id));

    gw.state.relay.leave(id, b.viewer_id);
    assert!(gw.has_grace_timer(id));

    // Leaving again changes nothing
    gw.state.relay.leave(id, b.viewer_id);
    assert_eq!(gw.viewer_count(id), 0);
    assert!(gw.has_grace_timer(id));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_token_leaves_registry_untouched() {
    let gw = gateway();
    let (id, _token, _shell) = gw.open().await;

    let err = gw.state.relay.join("not.a.token").unwrap_err();
    assert!(matches!(err, GatewayError::Auth(_)));

    let foreign = sg_core::TokenService::new(b"other").issue(id, GRACE);
    assert!(matches!(
        gw.state.relay.join(&foreign),
        Err(GatewayError::Auth(_))
    ));

    assert_eq!(gw.state.registry.len(), 1);
    assert_eq!(gw.viewer_count(id), 0);
    assert!(gw.has_grace_timer(id));
}

#[tokio::test(start_paused = true)]
async fn test_expired_token_leaves_registry_untouched() {
    let gw = gateway();
    let (id, token, _shell) = gw.open().await;

    let err = gw.state.relay.join(&expired_token(id)).unwrap_err();
    assert!(matches!(err, GatewayError::Auth(AuthError::Expired)));

    assert_eq!(gw.state.registry.len(), 1);
    assert_eq!(gw.viewer_count(id), 0);
    assert!(gw.has_grace_timer(id));

    // The live token for the same session still works
    let _viewer = gw.join(&token);
    assert_eq!(gw.viewer_count(id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_viewer_is_detached() {
    let gw = gateway();
    let (id, token, shell) = gw.open().await;

    // Never reads: holds the banner replay and the size prompt, then fills up
    let mut stalled = gw.join(&token);
    for i in 0..VIEWER_QUEUE_CAPACITY + 8 {
        assert!(shell.output(format!("{i};")).await);
    }

    let registry = Arc::clone(&gw.state.registry);
    settle(|| registry.get(id).map(|s| s.viewer_count() == 0).unwrap_or(false)).await;
    assert!(gw.has_grace_timer(id));
    assert_eq!(
        gw.state.registry.get(id).unwrap().state(),
        SessionState::Active
    );

    // What was queued before the eviction arrives intact, then the stream ends
    let mut queued = Vec::new();
    while let Some(event) = stalled.events.recv().await {
        queued.push(event);
    }
    assert_eq!(queued.len(), VIEWER_QUEUE_CAPACITY);
    assert!(matches!(&queued[0], ServerEvent::Data(text) if text.contains("SSH CONNECTION ESTABLISHED")));
    assert_eq!(queued[1], ServerEvent::RequestTerminalSize);
    assert_eq!(queued[2], ServerEvent::Data("0;".into()));
    assert_eq!(
        queued[VIEWER_QUEUE_CAPACITY - 1],
        ServerEvent::Data(format!("{};", VIEWER_QUEUE_CAPACITY - 3))
    );

    // The session keeps serving a viewer that does read
    let mut fresh = gw.join(&token);
    next_text(&mut fresh.events).await;
    assert!(shell.output("after").await);
    assert_eq!(next_text(&mut fresh.events).await, "after");
}

#[tokio::test(start_paused = true)]
async fn test_output_order_and_isolation() {
    let gw = gateway();
    let (id1, token1, shell1) = gw.open().await;
    let (_id2, token2, shell2) = gw.open().await;

    let mut v1 = gw.join(&token1);
    let mut v1b = gw.join(&token1);
    let mut v2 = gw.join(&token2);
    for v in [&mut v1, &mut v1b, &mut v2] {
        next_text(&mut v.events).await;
    }

    for chunk in ["o1", "o2", "o3"] {
        assert!(shell1.output(chunk).await);
    }
    assert!(shell2.output("other").await);

    for v in [&mut v1, &mut v1b] {
        let mut seen = String::new();
        while seen.len() < 6 {
            seen.push_str(&next_text(&mut v.events).await);
        }
        assert_eq!(seen, "o1o2o3");
    }
    assert_eq!(next_text(&mut v2.events).await, "other");

    assert_eq!(v1.session_id, id1);
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_gets_replay() {
    let gw = gateway();
    let (_id, token, shell) = gw.open().await;

    let mut early = gw.join(&token);
    next_text(&mut early.events).await;
    assert!(shell.output("hello ").await);
    assert_eq!(next_text(&mut early.events).await, "hello ");

    let mut late = gw.join(&token);
    let replay = next_text(&mut late.events).await;
    assert!(replay.contains("SSH CONNECTION ESTABLISHED"));
    assert!(replay.ends_with("hello "));

    assert!(shell.output("world").await);
    assert_eq!(next_text(&mut late.events).await, "world");
    assert_eq!(next_text(&mut early.events).await, "world");
}

#[tokio::test(start_paused = true)]
async fn test_split_utf8_output_is_reassembled() {
    let gw = gateway();
    let (_id, token, shell) = gw.open().await;

    let mut viewer = gw.join(&token);
    next_text(&mut viewer.events).await;

    let bytes = "héllo".as_bytes();
    assert!(shell.output(&bytes[..2]).await);
    assert!(shell.output(&bytes[2..]).await);

    let mut seen = String::new();
    while seen.len() < bytes.len() {
        seen.push_str(&next_text(&mut viewer.events).await);
    }
    assert_eq!(seen, "héllo");
}

#[tokio::test(start_paused = true)]
async fn test_backend_exit_notifies_and_tears_down() {
    let gw = gateway();
    let (id, token, shell) = gw.open().await;

    let mut viewer = gw.join(&token);
    next_text(&mut viewer.events).await;

    shell.exit(Some(0)).await;

    assert!(next_text(&mut viewer.events)
        .await
        .contains("SSH SESSION CLOSED"));
    assert!(viewer.events.recv().await.is_none());

    let registry = Arc::clone(&gw.state.registry);
    settle(|| !registry.contains(id)).await;
    assert_eq!(shell.close_count(), 1);

    // Terminating again has no side effects
    assert!(
        !gw.state
            .lifecycle
            .terminate(id, TerminationReason::BackendError("late".into()))
            .await
    );
    assert_eq!(shell.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backend_failure_reports_error() {
    let gw = gateway();
    let (_id, token, shell) = gw.open().await;

    let mut viewer = gw.join(&token);
    next_text(&mut viewer.events).await;

    shell.fail("connection reset").await;
    let text = next_text(&mut viewer.events).await;
    assert!(text.contains("SSH CONNECTION ERROR: connection reset"));
    assert!(viewer.events.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_auth_never_registers() {
    let gw = gateway();
    gw.connector.set_behavior(MockBehavior::RejectAuth);

    let err = gw
        .state
        .orchestrator
        .open(SshTarget::new("h", 22, "u"), Credential::Password("bad".into()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Connection(ConnectionError::AuthenticationFailed)
    ));
    assert!(gw.state.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_terminates_everything() {
    let gw = gateway();
    let (_id1, token1, shell1) = gw.open().await;
    let (_id2, _token2, shell2) = gw.open().await;

    let mut viewer = gw.join(&token1);
    next_text(&mut viewer.events).await;

    gw.state.lifecycle.shutdown_all().await;

    assert!(next_text(&mut viewer.events)
        .await
        .contains("GATEWAY SHUTTING DOWN"));
    assert!(viewer.events.recv().await.is_none());
    assert!(gw.state.registry.is_empty());
    assert_eq!(shell1.close_count(), 1);
    assert_eq!(shell2.close_count(), 1);
}
