use tracing::debug;

use crate::error::AccessError;

use super::audit::AuditLogger;
use super::identity::{IdentityResolver, Principal, Resolution};
use super::ownership::{Access, OwnershipGuard};
use super::rate_limit::{Admission, RateLimiter};

/// What one inbound request presents to the gate.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub authorization: Option<&'a str>,
    pub session_ref: Option<&'a str>,
    pub client_ip: &'a str,
    pub policy: &'a str,
    pub requires_auth: bool,
}

/// Per-request orchestration. Decision order is strict and
/// short-circuiting: resolve identity, rate-limit, authentication
/// requirement. The rate limit runs before authentication is required, so
/// anonymous hammering of a login endpoint is throttled too. Ownership is
/// checked afterwards via [`RequestGate::require_owner`], once the handler
/// has fetched the resource's recorded owner.
#[derive(Debug, Clone)]
pub struct RequestGate {
    resolver: IdentityResolver,
    limiter: RateLimiter,
    audit: AuditLogger,
}

impl RequestGate {
    pub fn new(resolver: IdentityResolver, limiter: RateLimiter, audit: AuditLogger) -> Self {
        Self {
            resolver,
            limiter,
            audit,
        }
    }

    /// Run the admission sequence. `Ok(None)` means an open endpoint
    /// admitted an anonymous caller; gated endpoints always get a
    /// principal or a typed denial.
    pub async fn admit(&self, req: GateRequest<'_>) -> Result<Option<Principal>, AccessError> {
        let resolution = self.resolver.resolve(req.authorization, req.session_ref).await;

        match self.limiter.check(req.policy, req.client_ip).await? {
            Admission::Admitted => {}
            Admission::Limited { retry_after_secs } => {
                self.audit.rate_limited(req.policy, req.client_ip);
                return Err(AccessError::RateLimited { retry_after_secs });
            }
        }

        match resolution {
            Resolution::Authenticated(principal) => {
                debug!(user_id = principal.id, policy = req.policy, "request admitted");
                Ok(Some(principal))
            }
            Resolution::Anonymous { expired_token } if req.requires_auth => {
                let reason = if expired_token { "expired_token" } else { "no_identity" };
                self.audit.auth_failure(req.client_ip, reason);
                if expired_token {
                    Err(AccessError::ExpiredCredential)
                } else {
                    Err(AccessError::AuthenticationRequired)
                }
            }
            Resolution::Anonymous { .. } => Ok(None),
        }
    }

    /// Gated-endpoint convenience: admission with the authentication
    /// requirement forced on, collapsed to a bare principal.
    pub async fn admit_authenticated(
        &self,
        req: GateRequest<'_>,
    ) -> Result<Principal, AccessError> {
        let req = GateRequest {
            requires_auth: true,
            ..req
        };
        match self.admit(req).await? {
            Some(principal) => Ok(principal),
            None => Err(AccessError::AuthenticationRequired),
        }
    }

    /// Object-level check, run after the resource is fetched.
    pub fn require_owner(
        &self,
        principal: &Principal,
        owner_id: u64,
    ) -> Result<(), AccessError> {
        match OwnershipGuard::check(principal, owner_id) {
            Access::Allowed => Ok(()),
            Access::Denied => {
                self.audit.ownership_denied(principal.id, owner_id);
                Err(AccessError::OwnershipDenied)
            }
        }
    }
}
