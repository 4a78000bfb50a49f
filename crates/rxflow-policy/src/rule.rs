//! Policy rule types and configuration schema.
//!
//! A `PolicyConfig` is deserialized from TOML and holds an ordered list of
//! `PolicyRule`s.  Rules are evaluated in declaration order; the first
//! matching rule wins.  If no rule matches, the engine denies by default.

use serde::{Deserialize, Serialize};

/// The decision a rule produces when it matches an incoming `PolicyContext`.
///
/// Example in TOML:
/// ```toml
/// verdict = "allow"
/// verdict = "deny"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleVerdict {
    Allow,
    Deny,
}

/// A single policy rule loaded from TOML.
///
/// A rule matches when the action pattern, the role list, and the optional
/// stage list all accept the incoming context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Stable identifier used in audit logs and error messages.
    pub id: String,

    /// Human-readable explanation of what this rule controls.
    pub description: String,

    /// The pipeline action to match against `PolicyContext::action`.
    /// Use `"*"` to match any action.
    pub action: String,

    /// Roles this rule applies to. `["*"]` matches any authenticated role.
    pub roles: Vec<String>,

    /// Stages this rule applies to. Empty matches any stage, including
    /// actions that target no prescription.
    #[serde(default)]
    pub stages: Vec<String>,

    pub verdict: RuleVerdict,

    /// Written to the audit log when `verdict = "deny"`.
    pub deny_reason: Option<String>,
}

impl PolicyRule {
    /// Return true if this rule applies to `action` by `role` at `stage`.
    ///
    /// Matching is exact and case-sensitive apart from the `"*"` wildcard.
    pub fn matches(&self, action: &str, role: &str, stage: Option<&str>) -> bool {
        let action_matches = self.action == "*" || self.action == action;
        let role_matches = self.roles.iter().any(|r| r == "*" || r == role);
        let stage_matches = self.stages.is_empty()
            || stage.is_some_and(|s| self.stages.iter().any(|allowed| allowed == s));
        action_matches && role_matches && stage_matches
    }
}

/// The top-level structure deserialized from a TOML policy file.
///
/// Example:
/// ```toml
/// [[rules]]
/// id = "release-pharmacist"
/// description = "Only pharmacists and admins release"
/// action = "release"
/// roles = ["pharmacist", "admin"]
/// stages = ["CHECK"]
/// verdict = "allow"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Ordered list of rules.  First match wins.
    pub rules: Vec<PolicyRule>,
}
