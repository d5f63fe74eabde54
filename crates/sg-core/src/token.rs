//! Session token service
//!
//! A session token is the only credential a realtime client presents. It is
//! a stateless HS256 JWT carrying two claims:
//!
//! - `sessionId`: the session the bearer may join
//! - `exp`: absolute expiry (unix seconds)
//!
//! Nothing is stored server-side, so verification is a pure function of the
//! token, the signing key and the clock. Whether the session still exists is
//! checked separately by the caller.
//!
//! # Signing Key
//!
//! The key comes from configuration. When none is configured the gateway
//! generates a random one at startup, so tokens do not survive a restart;
//! neither do the sessions they point at.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use sg_protocol::SessionId;

use crate::error::AuthError;
use crate::time::current_time_secs;

/// Length of a generated signing secret in bytes (before hex encoding)
const SECRET_BYTES: usize = 32;

/// Claims embedded in every session token
#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(rename = "sessionId")]
    session_id: String,
    exp: u64,
}

/// Issues and verifies signed session tokens
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    /// Create a token service for the given signing secret
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token scoped to `session_id`, valid for `ttl` from now
    pub fn issue(&self, session_id: SessionId, ttl: Duration) -> String {
        self.sign(&SessionClaims {
            session_id: session_id.to_string(),
            exp: current_time_secs().saturating_add(ttl.as_secs()),
        })
    }

    /// Verify a token and return the session it is scoped to
    pub fn verify(&self, token: &str) -> Result<SessionId, AuthError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| classify(&e))?;

        data.claims
            .session_id
            .parse()
            .map_err(|_| AuthError::Malformed)
    }

    fn sign(&self, claims: &SessionClaims) -> String {
        // Header and claims are plain strings and integers; serialization
        // and HMAC signing have no failure path for them.
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .expect("HS256 signing of session claims cannot fail")
    }
}

/// Map a decoding failure onto the three outcomes callers distinguish
fn classify(err: &jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Malformed,
    }
}

/// Generate a new random signing secret
///
/// Returns a 64-character hex string (32 random bytes)
pub fn generate_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}
