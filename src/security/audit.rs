use tracing::{info, warn};

/// Structured security-event log on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn auth_success(&self, user_id: u64, scheme: &str) {
        info!(target: "audit", event = "auth_success", user_id, scheme);
    }

    pub fn auth_failure(&self, client_ip: &str, reason: &str) {
        warn!(target: "audit", event = "auth_failure", client_ip, reason);
    }

    pub fn rate_limited(&self, policy: &str, client_ip: &str) {
        warn!(target: "audit", event = "rate_limited", policy, client_ip);
    }

    pub fn ownership_denied(&self, user_id: u64, owner_id: u64) {
        warn!(target: "audit", event = "ownership_denied", user_id, owner_id);
    }

    pub fn token_issued(&self, user_id: u64) {
        info!(target: "audit", event = "token_issued", user_id);
    }

    pub fn token_bridged(&self, user_id: u64) {
        info!(target: "audit", event = "token_bridged", user_id);
    }

    pub fn session_opened(&self, user_id: u64) {
        info!(target: "audit", event = "session_opened", user_id);
    }

    pub fn session_closed(&self, user_id: u64) {
        info!(target: "audit", event = "session_closed", user_id);
    }

    pub fn user_registered(&self, user_id: u64) {
        info!(target: "audit", event = "user_registered", user_id);
    }
}
