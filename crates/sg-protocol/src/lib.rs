//! sg-protocol: Realtime relay protocol for shellgate
//!
//! This crate defines the JSON events exchanged between browser terminals
//! and the gateway over the realtime channel, plus the identifiers and the
//! output chunker shared by the gateway crates.

pub mod codec;
pub mod error;
pub mod message;
pub mod session;

pub use codec::Utf8Chunker;
pub use error::ProtocolError;
pub use message::{ClientEvent, ServerEvent, TerminalSize};
pub use session::SessionId;
