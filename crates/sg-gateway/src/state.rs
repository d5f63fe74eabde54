//! Global gateway state

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sg_core::config::GatewayConfig;
use sg_core::error::GatewayError;
use sg_core::token::generate_secret;
use sg_core::traits::BackendConnector;
use sg_core::{CredentialStager, TokenService};
use sg_protocol::TerminalSize;

use crate::connection::{ConnectionOrchestrator, KeyFetcher};
use crate::relay::Relay;
use crate::session::{LifecycleManager, SessionRegistry};

/// Shared state for the gateway daemon
pub struct GatewayState {
    /// Configuration
    pub config: GatewayConfig,
    /// Session token signer
    pub tokens: Arc<TokenService>,
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Grace timers and teardown
    pub lifecycle: Arc<LifecycleManager>,
    /// Viewer fan-out
    pub relay: Arc<Relay>,
    /// Session start-up
    pub orchestrator: Arc<ConnectionOrchestrator>,
    /// Private key staging
    pub stager: CredentialStager,
    /// Private key download
    pub key_fetcher: KeyFetcher,
    /// Cancelled when the gateway shuts down
    pub shutdown: CancellationToken,
}

impl GatewayState {
    /// Wire up the gateway's components around a backend connector
    pub fn new(
        config: GatewayConfig,
        connector: Arc<dyn BackendConnector>,
        shutdown: CancellationToken,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let secret = match &config.token_secret {
            Some(secret) => secret.clone(),
            None => {
                tracing::warn!(
                    "No token secret configured - generated one; tokens will not survive a restart"
                );
                generate_secret()
            }
        };
        let tokens = Arc::new(TokenService::new(secret.as_bytes()));

        let registry = Arc::new(SessionRegistry::new(config.scrollback_bytes));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&registry),
            config.grace_period,
        ));
        let relay = Arc::new(Relay::new(
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            Arc::clone(&tokens),
        ));
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            connector,
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            Arc::clone(&relay),
            config.connect_timeout,
            TerminalSize::new(config.initial_rows, config.initial_cols),
            shutdown.clone(),
        ));
        let key_fetcher = KeyFetcher::new(config.key_fetch_timeout, config.max_key_bytes)?;
        let stager = CredentialStager::new(config.staging_dir.clone());

        Ok(Self {
            config,
            tokens,
            registry,
            lifecycle,
            relay,
            orchestrator,
            stager,
            key_fetcher,
            shutdown,
        })
    }
}
