use serde::{Deserialize, Serialize};

use super::session::SessionStore;
use super::token::{TokenCodec, VerifyError};

/// Coarse role carried in tokens and sessions. Admins bypass ownership
/// checks and see every resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Resolved identity attached to a request. Built fresh per request,
/// immutable, never persisted. `display_name` is informational and plays
/// no part in authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: u64,
    pub display_name: String,
    pub role: Role,
}

/// The two carriers of identity on the wire. A request yields at most one
/// of these; they are never merged or compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Session(String),
}

/// Outcome of identity resolution. Anonymous keeps track of whether an
/// expired bearer token was presented, so the gate can tell the client to
/// re-authenticate instead of retrying the same token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Authenticated(Principal),
    Anonymous { expired_token: bool },
}

/// Normalizes the two credential schemes into one `Principal`, or
/// anonymous. Bearer always wins: when an `Authorization` header exists,
/// valid or not, the session store is never consulted.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    codec: TokenCodec,
    sessions: SessionStore,
}

impl IdentityResolver {
    pub fn new(codec: TokenCodec, sessions: SessionStore) -> Self {
        Self { codec, sessions }
    }

    /// Pick the single credential a request presents. Only the exact
    /// `"Bearer "` prefix (with the space) is recognized; any other
    /// Authorization value yields no credential at all rather than falling
    /// through to the session.
    pub fn credential_from(
        authorization: Option<&str>,
        session_ref: Option<&str>,
    ) -> Option<Credential> {
        if let Some(value) = authorization {
            return value
                .strip_prefix("Bearer ")
                .map(|token| Credential::Bearer(token.to_string()));
        }
        session_ref.map(|sid| Credential::Session(sid.to_string()))
    }

    pub async fn resolve(
        &self,
        authorization: Option<&str>,
        session_ref: Option<&str>,
    ) -> Resolution {
        match Self::credential_from(authorization, session_ref) {
            Some(Credential::Bearer(token)) => match self.codec.verify(&token) {
                Ok(principal) => Resolution::Authenticated(principal),
                Err(VerifyError::Expired) => Resolution::Anonymous {
                    expired_token: true,
                },
                // A present-but-invalid bearer token is a failed
                // authentication attempt, not "try something else".
                Err(VerifyError::Malformed) => Resolution::Anonymous {
                    expired_token: false,
                },
            },
            Some(Credential::Session(sid)) => match self.sessions.get(&sid).await {
                Some(principal) => Resolution::Authenticated(principal),
                None => Resolution::Anonymous {
                    expired_token: false,
                },
            },
            None => Resolution::Anonymous {
                expired_token: false,
            },
        }
    }
}
