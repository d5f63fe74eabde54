//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConnectionError;

/// Remote host and account a session connects to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    /// Hostname or IP address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Remote account name
    pub username: String,
}

impl SshTarget {
    /// Create a target from already separated parts
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }

    /// Parse a `host`, `host:port` or `[v6addr]:port` string
    ///
    /// A bare IPv6 address (more than one colon, no brackets) is taken as a
    /// host without a port.
    pub fn parse(
        hostname: &str,
        username: &str,
        default_port: u16,
    ) -> Result<Self, ConnectionError> {
        let hostname = hostname.trim();
        let username = username.trim();

        if username.is_empty() {
            return Err(ConnectionError::InvalidTarget("username is empty".into()));
        }

        let (host, port) = if let Some(rest) = hostname.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                ConnectionError::InvalidTarget(format!("unterminated '[' in {hostname:?}"))
            })?;
            match tail.strip_prefix(':') {
                Some(port) => (host, parse_port(port)?),
                None if tail.is_empty() => (host, default_port),
                None => {
                    return Err(ConnectionError::InvalidTarget(format!(
                        "unexpected {tail:?} after address"
                    )))
                }
            }
        } else {
            match hostname.split_once(':') {
                Some((host, port)) if !port.contains(':') => (host, parse_port(port)?),
                _ => (hostname, default_port),
            }
        };

        if host.is_empty() {
            return Err(ConnectionError::InvalidTarget("hostname is empty".into()));
        }

        Ok(Self::new(host, port, username))
    }
}

fn parse_port(s: &str) -> Result<u16, ConnectionError> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(ConnectionError::InvalidTarget(format!("invalid port {s:?}"))),
        Ok(port) => Ok(port),
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.username, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.username, self.host, self.port)
        }
    }
}

/// Credentials handed to the SSH transport
#[derive(Clone)]
pub enum BackendAuth {
    /// Password authentication
    Password(String),
    /// Private key in PEM or OpenSSH format
    PrivateKey(String),
}

impl BackendAuth {
    /// Method name for logs
    pub fn method(&self) -> &'static str {
        match self {
            BackendAuth::Password(_) => "password",
            BackendAuth::PrivateKey(_) => "publickey",
        }
    }
}

// Never print secrets
impl fmt::Debug for BackendAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendAuth::{}(..)", self.method())
    }
}
