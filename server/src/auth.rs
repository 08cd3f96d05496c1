//! Identity verification seam for the connection gateway.
//!
//! Token issuance lives outside this system; the gateway only needs a way
//! to turn a handshake token into a verified [`Identity`] or an
//! authentication failure. Production deployments plug in a verifier that
//! calls the platform's identity service.

use async_trait::async_trait;
use shared::Identity;

use crate::error::EngineError;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolves a handshake token into a bound identity.
    async fn verify(&self, token: &str) -> Result<Identity, EngineError>;
}

/// Development verifier accepting tokens of the form `<user_id>:<name>`.
///
/// Rejects empty ids and names, which is enough to exercise the refusal
/// path end to end without a real identity service.
#[derive(Debug, Default)]
pub struct LocalVerifier;

#[async_trait]
impl IdentityVerifier for LocalVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, EngineError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(EngineError::Authentication("missing token".to_string()));
        }

        match token.split_once(':') {
            Some((user_id, display_name))
                if !user_id.trim().is_empty() && !display_name.trim().is_empty() =>
            {
                Ok(Identity::new(user_id.trim(), display_name.trim()))
            }
            _ => Err(EngineError::Authentication("invalid token".to_string())),
        }
    }
}
