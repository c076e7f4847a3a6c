use crate::error::AccessError;

use super::audit::AuditLogger;
use super::identity::Principal;
use super::token::TokenCodec;

/// Mints bearer tokens for principals that authenticated via a browser
/// session, unifying the two schemes behind one verification path.
#[derive(Debug, Clone)]
pub struct SessionTokenBridge {
    codec: TokenCodec,
    audit: AuditLogger,
}

impl SessionTokenBridge {
    pub fn new(codec: TokenCodec, audit: AuditLogger) -> Self {
        Self { codec, audit }
    }

    /// Issue a token for an already-resolved principal; anonymous callers
    /// are rejected. Repeated calls mint distinct but equally valid
    /// tokens; callers are expected to cache the result client-side.
    pub fn bridge(&self, principal: Option<&Principal>) -> Result<String, AccessError> {
        let Some(principal) = principal else {
            return Err(AccessError::AuthenticationRequired);
        };
        let token = self.codec.issue(principal)?;
        self.audit.token_bridged(principal.id);
        Ok(token)
    }
}
