//! Staff roles.
//!
//! The pipeline never trusts a role claimed by the caller. Roles are
//! resolved from the identity service for every action, and role checks live
//! in the pipeline itself rather than in whatever UI drives it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The role an authenticated staff member holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Pharmacist,
    Technician,
    Cashier,
}

impl Role {
    /// Roles permitted to release a prescription from CHECK.
    ///
    /// This set is fixed in code; configurable policy may narrow who releases
    /// but can never widen it.
    pub const RELEASERS: [Role; 2] = [Role::Pharmacist, Role::Admin];

    /// The lowercase name used in policy files and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Pharmacist => "pharmacist",
            Role::Technician => "technician",
            Role::Cashier => "cashier",
        }
    }

    pub fn may_release(&self) -> bool {
        Self::RELEASERS.contains(self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
