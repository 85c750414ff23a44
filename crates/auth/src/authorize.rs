use thiserror::Error;

use stockledger_core::{InventoryId, UserId};

use crate::{Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// What a request wants to touch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    /// Read or mutate stock entries of one inventory.
    Stock(InventoryId),
    /// Create or remove manager assignments, or list them for arbitrary managers.
    ManageAssignments,
    /// Read the assignments of one specific manager.
    AssignmentsOf(UserId),
    /// Query the audit trail.
    AuditTrail,
    /// Push account-level notices to other users.
    AccountNotices,
    /// Open a notification stream.
    Notifications,
}

/// Authorize a principal for an access.
///
/// - No IO: `is_assigned` answers manager membership (typically backed by the
///   in-memory assignment cache)
/// - No panics
pub fn authorize(
    principal: &Principal,
    access: Access,
    is_assigned: impl FnOnce(InventoryId) -> bool,
) -> Result<(), AuthzError> {
    let allowed = match (principal.role, access) {
        (Role::Admin, _) => true,
        (_, Access::Notifications) => true,
        (Role::Manager, Access::Stock(inventory_id)) => is_assigned(inventory_id),
        (Role::Manager, Access::AssignmentsOf(manager_id)) => manager_id == principal.user_id,
        (Role::Manager, Access::ManageAssignments | Access::AuditTrail | Access::AccountNotices) => false,
        (Role::User, _) => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(format!(
            "{} {} may not access {:?}",
            principal.role, principal.user_id, access
        )))
    }
}
