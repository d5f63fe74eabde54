//! Backend connections
//!
//! `ConnectionOrchestrator` drives session start-up against any
//! `BackendConnector`; `RusshConnector` is the production SSH transport and
//! `mock::MockConnector` an in-process stand-in for tests.

mod key_fetch;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod orchestrator;
mod ssh;

pub use key_fetch::KeyFetcher;
pub use orchestrator::{ConnectionOrchestrator, Credential};
pub use ssh::RusshConnector;
