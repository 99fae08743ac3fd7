use thiserror::Error;

use warden_core::IdentityId;

use crate::{Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: requires role '{0}'")]
    Forbidden(Role),

    #[error("forbidden: not the owner of this identity")]
    NotOwner,
}

/// Require the principal to hold `required` (admins satisfy any role).
///
/// - No IO
/// - No panics
pub fn require_role(principal: &Principal, required: Role) -> Result<(), AuthzError> {
    if principal.role.grants(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required))
    }
}

/// Allow access to an identity's own record, or to any record for admins.
pub fn require_self_or_admin(principal: &Principal, target: IdentityId) -> Result<(), AuthzError> {
    if principal.identity_id == target || principal.role == Role::Admin {
        Ok(())
    } else {
        Err(AuthzError::NotOwner)
    }
}
