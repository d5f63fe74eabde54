//! HTTP server

mod error;
mod listener;
mod routes;

pub use error::ApiError;
pub use listener::HttpServer;
pub use routes::router;
