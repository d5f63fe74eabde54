//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the gateway daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP / WebSocket listener binds to
    pub bind_address: String,

    /// Session token signing secret. Generated at startup when absent.
    pub token_secret: Option<String>,

    /// Lifetime of issued session tokens
    #[serde(with = "duration_secs")]
    pub token_ttl: Duration,

    /// How long a session survives with no viewers attached
    #[serde(with = "duration_secs")]
    pub grace_period: Duration,

    /// Upper bound on TCP connect, SSH handshake, authentication and shell open
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for downloading a private key from `privateKeyUrl`
    #[serde(with = "duration_secs")]
    pub key_fetch_timeout: Duration,

    /// Largest private key accepted by upload or download
    pub max_key_bytes: usize,

    /// Directory for transient private-key files
    pub staging_dir: PathBuf,

    /// Directory holding the terminal page and its assets
    pub static_dir: PathBuf,

    /// Output retained per session for viewers that join later
    pub scrollback_bytes: usize,

    /// Port used when the hostname carries none
    pub default_ssh_port: u16,

    /// PTY rows requested before the first client resize
    pub initial_rows: u16,

    /// PTY columns requested before the first client resize
    pub initial_cols: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            token_secret: None,
            token_ttl: Duration::from_secs(24 * 60 * 60),
            grace_period: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(20),
            key_fetch_timeout: Duration::from_secs(10),
            max_key_bytes: 64 * 1024,
            staging_dir: std::env::temp_dir().join("shellgate-keys"),
            static_dir: PathBuf::from("public"),
            scrollback_bytes: 64 * 1024,
            default_ssh_port: 22,
            initial_rows: 24,
            initial_cols: 80,
        }
    }
}

impl GatewayConfig {
    /// Reject values the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::Invalid("bind_address is empty".into()));
        }
        if self.token_ttl.is_zero() {
            return Err(ConfigError::Invalid("token_ttl must be positive".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid("connect_timeout must be positive".into()));
        }
        if self.max_key_bytes == 0 {
            return Err(ConfigError::Invalid("max_key_bytes must be positive".into()));
        }
        if self.initial_rows == 0 || self.initial_cols == 0 {
            return Err(ConfigError::Invalid(
                "initial terminal size must be non-zero".into(),
            ));
        }
        if matches!(&self.token_secret, Some(s) if s.is_empty()) {
            return Err(ConfigError::Invalid("token_secret is empty".into()));
        }
        Ok(())
    }
}
