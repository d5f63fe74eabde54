//! Event types for the realtime relay protocol
//!
//! Every realtime frame is a JSON text message of the form
//! `{"event": <name>, "data": <payload>}`. Event names are fixed and match
//! what the browser terminal emits and listens for.
//!
//! # Event Flow
//!
//! 1. Browser connects and sends `join` with the session token it received
//!    in the start-session redirect
//! 2. Gateway attaches the viewer and answers with `requestTerminalSize`
//! 3. Browser reports its dimensions with `resize`
//! 4. Terminal I/O: `data` flows in both directions
//! 5. Join failures produce a single `error` event followed by close

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }

    /// A size with a zero dimension cannot be applied to a PTY
    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// Events sent by a browser terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Attach to the session the token is scoped to
    Join {
        #[serde(alias = "sessionToken")]
        token: String,
    },
    /// Keyboard input for the backend shell
    Data { data: String },
    /// The browser terminal changed its dimensions
    Resize { rows: u16, cols: u16 },
}

impl ClientEvent {
    /// Parse a realtime text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Events sent by the gateway to a browser terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Shell output, or an inline diagnostic rendered by the terminal
    Data(String),
    /// Ask the viewer to resend its current terminal size
    RequestTerminalSize,
    /// Human-readable failure; the connection is closed afterwards
    Error(String),
}

impl ServerEvent {
    /// Build an inline diagnostic line, framed the way the terminal shows
    /// gateway status (`*** ... ***` on its own line)
    pub fn diagnostic(text: impl AsRef<str>) -> Self {
        Self::Data(format!("\r\n*** {} ***\r\n", text.as_ref()))
    }

    /// Serialize into a realtime text frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
