//! sg-core: Core abstractions and configuration for shellgate
//!
//! This crate provides the configuration, error taxonomy, session token
//! service, credential staging and backend transport traits used by the
//! gateway.

pub mod config;
pub mod error;
pub mod staging;
pub mod time;
pub mod token;
pub mod traits;
pub mod types;

pub use error::GatewayError;
pub use staging::{CredentialStager, StagedCredential};
pub use token::TokenService;
pub use types::{BackendAuth, SshTarget};
