use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::identity::{Principal, Role};

// Token wire format: base64url(header) "." base64url(payload) "." base64url(sig)
// with HMAC-SHA256 over the first two segments.

type HmacSha256 = Hmac<Sha256>;

const HEADER: &[u8] = br#"{"alg":"HS256","typ":"token"}"#;

/// Signed token payload. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: u64,
    pub display_name: String,
    pub role: Role,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Why a token failed verification. The two cases map to different
/// client-visible outcomes, so callers must be able to tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Wrong segment count, undecodable segments, or signature mismatch.
    #[error("malformed token")]
    Malformed,
    /// Signature checked out but the clock is past `expires_at`.
    #[error("token expired")]
    Expired,
}

/// Issues and verifies compact signed identity tokens. Stateless; purely
/// functional given the signing key. Key sourcing (and refusing to start
/// without one outside development) is the bootstrap's job.
#[derive(Clone)]
pub struct TokenCodec {
    key: Vec<u8>,
    ttl_secs: i64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never end up in logs.
        f.debug_struct("TokenCodec")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(key: impl Into<Vec<u8>>, ttl_secs: i64) -> Self {
        Self {
            key: key.into(),
            ttl_secs,
        }
    }

    /// Issue a token for `principal`, valid for the configured TTL from now.
    pub fn issue(&self, principal: &Principal) -> Result<String> {
        let now = Utc::now().timestamp();
        self.encode(&Claims {
            id: principal.id,
            display_name: principal.display_name.clone(),
            role: principal.role,
            issued_at: now,
            expires_at: now + self.ttl_secs,
        })
    }

    /// Sign arbitrary claims. `issue` builds on this; it is also the hook
    /// for callers that need non-standard validity windows.
    pub fn encode(&self, claims: &Claims) -> Result<String> {
        let header = URL_SAFE_NO_PAD.encode(HEADER);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header}.{payload}");

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| anyhow!("invalid signing key"))?;
        mac.update(signing_input.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{sig}"))
    }

    /// Check signature integrity and expiry, returning the embedded
    /// principal. Signature comparison is constant-time.
    pub fn verify(&self, token: &str) -> Result<Principal, VerifyError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(sig), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(VerifyError::Malformed);
        };

        let signing_input = &token[..header.len() + 1 + payload.len()];
        let provided = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| VerifyError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| VerifyError::Malformed)?;
        mac.update(signing_input.as_bytes());
        let expected = mac.finalize().into_bytes();
        if provided.ct_eq(expected.as_slice()).unwrap_u8() != 1 {
            return Err(VerifyError::Malformed);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| VerifyError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload_bytes).map_err(|_| VerifyError::Malformed)?;

        if Utc::now().timestamp() >= claims.expires_at {
            return Err(VerifyError::Expired);
        }

        Ok(Principal {
            id: claims.id,
            display_name: claims.display_name,
            role: claims.role,
        })
    }
}
