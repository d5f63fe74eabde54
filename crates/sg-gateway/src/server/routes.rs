//! HTTP routes
//!
//! - `POST /terminal` (multipart) and `GET /connect` start a session and
//!   redirect to the terminal page with a fresh `sessionToken`
//! - `GET /terminal` serves the terminal page to token holders
//! - `GET /ws` is the realtime relay
//! - `GET /public/*path` serves the page's assets
//! - `GET /health` reports liveness

use std::path::{Component, Path};
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use sg_core::error::GatewayError;
use sg_core::SshTarget;

use super::error::ApiError;
use crate::connection::Credential;
use crate::relay::ws_handler;
use crate::state::GatewayState;

const TERMINAL_PAGE: &str = "terminal.html";

/// Build the gateway router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/terminal", get(terminal_page).post(start_from_form))
        .route("/connect", get(start_from_query))
        .route("/ws", get(ws_handler))
        .route("/public/*path", get(static_asset))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct TerminalQuery {
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
}

/// `GET /terminal?sessionToken=T`
async fn terminal_page(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<TerminalQuery>,
) -> Result<Response, ApiError> {
    let token = query
        .session_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing sessionToken".into()))?;

    let session_id = state.tokens.verify(&token)?;

    let live = state
        .registry
        .get(session_id)
        .map(|handle| handle.state().accepts_viewers())
        .unwrap_or(false);
    if !live {
        return Err(ApiError::SessionGone);
    }

    let path = state.config.static_dir.join(TERMINAL_PAGE);
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Ok(Html(html).into_response()),
        Err(e) => {
            tracing::warn!("Cannot read terminal page {:?}: {}", path, e);
            Err(ApiError::NotFound("Terminal page not found".into()))
        }
    }
}

/// Fields of the start-session form
#[derive(Default)]
struct StartForm {
    hostname: Option<String>,
    username: Option<String>,
    password: Option<String>,
    private_key: Option<Vec<u8>>,
}

/// `POST /terminal` (multipart form)
async fn start_from_form(
    State(state): State<Arc<GatewayState>>,
    mut multipart: Multipart,
) -> Result<Redirect, ApiError> {
    let mut form = StartForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "hostname" | "username" | "password" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                match name.as_str() {
                    "hostname" => form.hostname = Some(value),
                    "username" => form.username = Some(value),
                    _ => form.password = Some(value),
                }
            }
            "privateKey" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                if bytes.len() > state.config.max_key_bytes {
                    return Err(ApiError::BadRequest("Private key too large".into()));
                }
                if !bytes.is_empty() {
                    form.private_key = Some(bytes.to_vec());
                }
            }
            other => {
                tracing::debug!("Ignoring form field {:?}", other);
            }
        }
    }

    let target = parse_target(&state, form.hostname, form.username)?;
    let credential = match form.private_key {
        Some(key) => stage(&state, &key).await?,
        None => password_credential(form.password)?,
    };

    start(&state, target, credential).await
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    hostname: Option<String>,
    username: Option<String>,
    /// Base64
    password: Option<String>,
    /// Base64
    #[serde(rename = "privateKeyUrl")]
    private_key_url: Option<String>,
}

/// `GET /connect?hostname&username&password&privateKeyUrl`
async fn start_from_query(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<Redirect, ApiError> {
    let target = parse_target(&state, query.hostname, query.username)?;

    let credential = match query.private_key_url.filter(|u| !u.is_empty()) {
        Some(encoded) => {
            let url = decode_base64_text(&encoded, "privateKeyUrl")?;
            let key = state
                .key_fetcher
                .fetch(&url)
                .await
                .map_err(GatewayError::from)?;
            stage(&state, &key).await?
        }
        None => {
            let password = query
                .password
                .map(|p| decode_base64_text(&p, "password"))
                .transpose()?;
            password_credential(password)?
        }
    };

    start(&state, target, credential).await
}

/// `GET /health`
async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.len(),
    }))
}

/// `GET /public/*path`
async fn static_asset(
    State(state): State<Arc<GatewayState>>,
    axum::extract::Path(path): axum::extract::Path<String>,
) -> Response {
    let relative = Path::new(&path);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(state.config.static_dir.join(relative)).await {
        Ok(body) => ([(header::CONTENT_TYPE, content_type(relative))], body).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Open the session and redirect to the terminal page
async fn start(
    state: &GatewayState,
    target: SshTarget,
    credential: Credential,
) -> Result<Redirect, ApiError> {
    let session_id = state.orchestrator.open(target, credential).await?;
    let token = state.tokens.issue(session_id, state.config.token_ttl);
    Ok(Redirect::to(&format!("/terminal?sessionToken={}", token)))
}

fn parse_target(
    state: &GatewayState,
    hostname: Option<String>,
    username: Option<String>,
) -> Result<SshTarget, ApiError> {
    match (hostname, username) {
        (Some(hostname), Some(username)) if !hostname.is_empty() && !username.is_empty() => {
            SshTarget::parse(&hostname, &username, state.config.default_ssh_port)
                .map_err(|e| GatewayError::from(e).into())
        }
        _ => Err(ApiError::BadRequest(
            "Missing required parameters: username and hostname".into(),
        )),
    }
}

fn password_credential(password: Option<String>) -> Result<Credential, ApiError> {
    match password {
        Some(password) if !password.is_empty() => Ok(Credential::Password(password)),
        _ => Err(ApiError::BadRequest(
            "Missing credentials: password or privateKey".into(),
        )),
    }
}

async fn stage(state: &GatewayState, key: &[u8]) -> Result<Credential, ApiError> {
    match state.stager.stage(key).await {
        Ok(staged) => Ok(Credential::StagedKey(staged)),
        Err(e) => {
            tracing::error!("Failed to stage private key in {:?}: {}", state.stager.dir(), e);
            Err(ApiError::Internal)
        }
    }
}

/// Decode a base64 query parameter into text
///
/// Query decoding turns an unescaped `+` into a space, so spaces are mapped
/// back before decoding. Both the standard and URL-safe alphabets are
/// accepted.
fn decode_base64_text(encoded: &str, field: &str) -> Result<String, ApiError> {
    let encoded = encoded.trim().replace(' ', "+");
    let bytes = STANDARD
        .decode(&encoded)
        .or_else(|_| URL_SAFE.decode(&encoded))
        .map_err(|_| ApiError::BadRequest(format!("Invalid base64 in {}", field)))?;
    String::from_utf8(bytes).map_err(|_| ApiError::BadRequest(format!("Invalid text in {}", field)))
}
