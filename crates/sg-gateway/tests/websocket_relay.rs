//! End-to-end relay tests over a real listener
//!
//! Starts the HTTP server on an ephemeral port, opens a session through
//! `GET /connect`, and drives the relay with a WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use sg_core::config::GatewayConfig;
use sg_core::traits::ShellInput;
use sg_gateway::connection::mock::MockConnector;
use sg_gateway::{GatewayState, HttpServer};
use sg_protocol::TerminalSize;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    connector: MockConnector,
    cancel: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

async fn start_gateway() -> Running {
    let config = GatewayConfig {
        token_secret: Some("e2e-secret".into()),
        staging_dir: std::env::temp_dir().join("shellgate-e2e-tests"),
        ..Default::default()
    };
    let connector = MockConnector::new();
    let cancel = CancellationToken::new();
    let state = Arc::new(
        GatewayState::new(config, Arc::new(connector.clone()), cancel.clone()).unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(Arc::clone(&state), cancel.clone());
    let server = tokio::spawn(async move { server.run_on(listener).await });

    Running {
        addr,
        state,
        connector,
        cancel,
        server,
    }
}

impl Running {
    /// Start a session over HTTP and return the token from the redirect
    async fn start_session(&self) -> String {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let url = format!(
            "http://{}/connect?hostname=h&username=u&password={}",
            self.addr,
            STANDARD.encode("pw")
        );
        let response = http.get(url).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SEE_OTHER);

        let location = response.headers()["location"].to_str().unwrap();
        location
            .strip_prefix("/terminal?sessionToken=")
            .unwrap()
            .to_string()
    }

    async fn viewer(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        ws
    }
}

async fn send(ws: &mut Client, event: Value) {
    ws.send(Message::Text(event.to_string().into()))
        .await
        .unwrap();
}

/// Next message, skipping control frames other than close
async fn next_message(ws: &mut Client) -> Message {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for the gateway")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_event(ws: &mut Client) -> Value {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

/// Next `data` payload, skipping size prompts
async fn next_data(ws: &mut Client) -> String {
    loop {
        let event = next_event(ws).await;
        match event["event"].as_str() {
            Some("data") => return event["data"].as_str().unwrap().to_string(),
            Some("requestTerminalSize") => continue,
            _ => panic!("unexpected event {}", event),
        }
    }
}

async fn expect_close(ws: &mut Client, code: CloseCode) {
    match next_message(ws).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, code),
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn test_viewer_round_trip() {
    let gw = start_gateway().await;
    let token = gw.start_session().await;
    let shell = gw.connector.last_shell().unwrap();

    let mut ws = gw.viewer().await;
    send(&mut ws, json!({"event": "join", "data": {"token": token}})).await;

    assert!(next_data(&mut ws).await.contains("SSH CONNECTION ESTABLISHED"));
    assert_eq!(next_event(&mut ws).await, json!({"event": "requestTerminalSize"}));

    send(&mut ws, json!({"event": "resize", "data": {"rows": 40, "cols": 120}})).await;
    send(&mut ws, json!({"event": "data", "data": {"data": "ls\n"}})).await;

    assert_eq!(
        timeout(WAIT, shell.next_input()).await.unwrap(),
        Some(ShellInput::Resize(TerminalSize::new(40, 120)))
    );
    assert_eq!(
        timeout(WAIT, shell.next_input()).await.unwrap(),
        Some(ShellInput::Data(Bytes::from_static(b"ls\n")))
    );

    assert!(shell.output("file.txt\r\n").await);
    assert_eq!(next_data(&mut ws).await, "file.txt\r\n");

    shell.exit(Some(0)).await;
    assert!(next_data(&mut ws).await.contains("SSH SESSION CLOSED"));
    expect_close(&mut ws, CloseCode::Normal).await;

    gw.cancel.cancel();
}

#[tokio::test]
async fn test_events_before_join_are_ignored() {
    let gw = start_gateway().await;
    let token = gw.start_session().await;
    let shell = gw.connector.last_shell().unwrap();

    let mut ws = gw.viewer().await;
    send(&mut ws, json!({"event": "data", "data": {"data": "rm -rf /\n"}})).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    send(&mut ws, json!({"event": "join", "data": {"sessionToken": token}})).await;
    next_data(&mut ws).await;

    send(&mut ws, json!({"event": "data", "data": {"data": "pwd\n"}})).await;
    assert_eq!(
        timeout(WAIT, shell.next_input()).await.unwrap(),
        Some(ShellInput::Data(Bytes::from_static(b"pwd\n")))
    );

    gw.cancel.cancel();
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let gw = start_gateway().await;
    gw.start_session().await;

    let mut ws = gw.viewer().await;
    send(&mut ws, json!({"event": "join", "data": {"token": "forged"}})).await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "error");
    assert!(event["data"]
        .as_str()
        .unwrap()
        .starts_with("Authentication failed"));
    expect_close(&mut ws, CloseCode::Policy).await;

    let sessions = gw.state.registry.list();
    assert_eq!(sessions[0].viewer_count(), 0);

    gw.cancel.cancel();
}

#[tokio::test]
async fn test_disconnect_starts_grace_timer() {
    let gw = start_gateway().await;
    let token = gw.start_session().await;
    let session = Arc::clone(&gw.state.registry.list()[0]);

    let mut ws = gw.viewer().await;
    send(&mut ws, json!({"event": "join", "data": {"token": token}})).await;
    next_data(&mut ws).await;
    assert_eq!(session.viewer_count(), 1);
    assert!(!session.has_grace_timer());

    ws.close(None).await.unwrap();
    drop(ws);

    timeout(WAIT, async {
        while session.viewer_count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(session.has_grace_timer());

    gw.cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_notifies_viewers() {
    let gw = start_gateway().await;
    let token = gw.start_session().await;
    let shell = gw.connector.last_shell().unwrap();

    let mut ws = gw.viewer().await;
    send(&mut ws, json!({"event": "join", "data": {"token": token}})).await;
    next_data(&mut ws).await;

    gw.cancel.cancel();

    assert!(next_data(&mut ws).await.contains("GATEWAY SHUTTING DOWN"));
    expect_close(&mut ws, CloseCode::Normal).await;
    drop(ws);

    timeout(WAIT, gw.server).await.unwrap().unwrap().unwrap();
    assert!(gw.state.registry.is_empty());
    assert_eq!(shell.close_count(), 1);
}
