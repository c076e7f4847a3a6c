use super::identity::Principal;

/// Outcome of an object-level access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
}

/// Object-level authorization: a principal may touch a resource iff they
/// own it or hold the admin role. This check runs on every read, update
/// and delete of an owned resource, never only on write paths; list
/// queries filter by owner at the store instead (an admin's unrestricted
/// view and a user's owned-only view are different projections).
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipGuard;

impl OwnershipGuard {
    pub fn check(principal: &Principal, owner_id: u64) -> Access {
        if principal.role.is_admin() || principal.id == owner_id {
            Access::Allowed
        } else {
            Access::Denied
        }
    }
}
