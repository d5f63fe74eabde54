//! sg-gateway: Browser terminals for remote SSH shells
//!
//! The gateway accepts start-session requests over HTTP, opens an SSH
//! shell on the requested host, and relays the shell to any number of
//! browser viewers over a WebSocket. Access to a session is granted by a
//! signed, expiring session token. A session with no viewers is kept alive
//! for a grace period, then torn down.

pub mod connection;
pub mod relay;
pub mod server;
pub mod session;
pub mod state;

pub use server::HttpServer;
pub use state::GatewayState;
