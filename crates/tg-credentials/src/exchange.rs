// exchange.rs — Identity exchange: trade the issuer identity for a scoped token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::error::CredentialError;

/// What the broker asks the exchange for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// The privileged identity to act as.
    pub principal: String,
    pub tool: String,
    pub action_id: Uuid,
    pub ttl_secs: u64,
}

/// A bearer token minted by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangedToken {
    pub token: String,
}

/// External identity service. A failure here denies the action.
pub trait IdentityExchange: Send + Sync {
    fn exchange(&self, request: &TokenRequest) -> Result<ExchangedToken, CredentialError>;
}

/// Mints random bearer tokens locally: 32 bytes from the OS RNG, base64url.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTokenExchange;

impl IdentityExchange for LocalTokenExchange {
    fn exchange(&self, _request: &TokenRequest) -> Result<ExchangedToken, CredentialError> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CredentialError::ExchangeUnavailable(e.to_string()))?;
        Ok(ExchangedToken {
            token: format!("tgc_{}", URL_SAFE_NO_PAD.encode(bytes)),
        })
    }
}
