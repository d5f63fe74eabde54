//! Core error types for shellgate

use sg_protocol::{ProtocolError, SessionId};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session token rejected
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    /// Backend transport could not be established
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Transport is up but no interactive shell could be opened
    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session token verification failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Token could not be parsed
    #[error("Malformed session token")]
    Malformed,

    /// Signature does not match the gateway key
    #[error("Invalid session token signature")]
    InvalidSignature,

    /// Token is past its expiry
    #[error("Session token expired")]
    Expired,
}

/// Backend connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Hostname or port could not be parsed
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The remote host rejected the supplied credentials
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Connection refused or host unreachable
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection attempt did not finish in time
    #[error("Connection timed out")]
    Timeout,

    /// Private key material could not be read or decoded
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// Remote private key could not be downloaded
    #[error("Failed to download private key: {0}")]
    KeyFetch(String),

    /// Transport-level failure after the TCP connection was made
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Interactive shell channel errors
#[derive(Error, Debug)]
pub enum ShellError {
    /// Session channel could not be opened
    #[error("Failed to open channel: {0}")]
    ChannelOpen(String),

    /// PTY allocation was refused
    #[error("PTY request failed: {0}")]
    PtyRequest(String),

    /// Shell could not be started on the channel
    #[error("Shell request failed: {0}")]
    ShellRequest(String),
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session not found (never existed or already terminated)
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// A live session already uses this id
    #[error("Duplicate session: {0}")]
    DuplicateSession(SessionId),
}

/// Staged credential material could not be deleted
///
/// Only ever logged; never returned to a caller.
#[derive(Error, Debug)]
#[error("Failed to delete staged credential {path:?}: {source}")]
pub struct ResourceCleanupError {
    /// Path of the staged file
    pub path: PathBuf,
    /// Underlying failure
    #[source]
    pub source: std::io::Error,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
