//! Policy verdict and evaluation context types.
//!
//! The policy engine consumes a `PolicyContext` and produces a `PolicyVerdict`.
//! The pipeline is deny-by-default: anything other than `Allow` blocks the
//! action before any state is read for writing.

use serde::{Deserialize, Serialize};

/// The decision emitted by the policy engine for one pipeline action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyVerdict {
    /// The action is permitted.
    Allow,

    /// The action is denied.
    Deny {
        /// Human-readable explanation, written to the audit log.
        reason: String,
    },
}

/// Everything the policy engine needs to make a decision.
///
/// All fields are plain strings so policy rules can be written without
/// depending on the full contract type hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyContext {
    /// The authenticated actor.
    pub actor_id: String,
    /// The actor's role as resolved by the identity service (e.g. "pharmacist").
    pub role: String,
    /// The pipeline action (e.g. "advance", "release", "handoff").
    pub action: String,
    /// The prescription's current stage, when the action targets one.
    pub stage: Option<String>,
    /// The targeted record, for audit context.
    pub resource: String,
}
