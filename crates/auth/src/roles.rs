use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AuthzError;

/// Closed set of roles known to the ledger.
///
/// Routing and authorization match on this exhaustively; adding a role is a
/// compile-time change everywhere a decision depends on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees and mutates every inventory, manages assignments.
    Admin,
    /// Sees and mutates only inventories assigned to them.
    Manager,
    /// Receives only notices addressed to them.
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::User => "user",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" | "inventory_manager" => Ok(Role::Manager),
            "user" => Ok(Role::User),
            other => Err(AuthzError::UnknownRole(other.to_string())),
        }
    }
}
