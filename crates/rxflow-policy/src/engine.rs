//! TOML-driven policy engine implementation.
//!
//! `TomlPolicyEngine` loads a `PolicyConfig` from a TOML string or file and
//! implements the `PolicyEngine` trait from rxflow-core.
//!
//! Evaluation algorithm:
//!
//! 1. Iterate rules in declaration order.
//! 2. The first rule whose action, roles, and stages match decides:
//!    `allow` → `Allow`, `deny` → `Deny` with the rule's reason.
//! 3. If no rule matched → `Deny` with "denied by default".

use std::path::Path;

use tracing::{debug, warn};

use rxflow_contracts::{
    error::{RxError, RxResult},
    policy::{PolicyContext, PolicyVerdict},
};
use rxflow_core::traits::PolicyEngine;

use crate::rule::{PolicyConfig, RuleVerdict};

/// A `PolicyEngine` implementation that reads rules from a TOML document.
///
/// ```rust,ignore
/// use rxflow_policy::engine::TomlPolicyEngine;
///
/// let engine = TomlPolicyEngine::from_file(Path::new("policies/pharmacy.toml"))?;
/// ```
#[derive(Debug)]
pub struct TomlPolicyEngine {
    config: PolicyConfig,
}

impl TomlPolicyEngine {
    /// Parse `s` as TOML and build a `TomlPolicyEngine`.
    ///
    /// Returns `RxError::Config` if the TOML is malformed, does not match the
    /// `PolicyConfig` schema, or a rule lists no roles.
    pub fn from_toml_str(s: &str) -> RxResult<Self> {
        let config: PolicyConfig = toml::from_str(s).map_err(|e| RxError::Config {
            reason: format!("failed to parse policy TOML: {}", e),
        })?;

        if let Some(rule) = config.rules.iter().find(|r| r.roles.is_empty()) {
            return Err(RxError::Config {
                reason: format!("policy rule '{}' lists no roles", rule.id),
            });
        }

        debug!(rules = config.rules.len(), "policy loaded");
        Ok(Self { config })
    }

    /// Read the file at `path` and parse it as TOML policy configuration.
    pub fn from_file(path: &Path) -> RxResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RxError::Config {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn rule_count(&self) -> usize {
        self.config.rules.len()
    }
}

impl PolicyEngine for TomlPolicyEngine {
    fn evaluate(&self, ctx: &PolicyContext) -> RxResult<PolicyVerdict> {
        debug!(
            actor_id = %ctx.actor_id,
            role = %ctx.role,
            action = %ctx.action,
            stage = ?ctx.stage,
            "evaluating policy"
        );

        let stage = ctx.stage.as_deref();
        for rule in &self.config.rules {
            if !rule.matches(&ctx.action, &ctx.role, stage) {
                continue;
            }

            debug!(rule_id = %rule.id, action = %ctx.action, "rule matched");

            let verdict = match rule.verdict {
                RuleVerdict::Allow => PolicyVerdict::Allow,
                RuleVerdict::Deny => PolicyVerdict::Deny {
                    reason: rule
                        .deny_reason
                        .clone()
                        .unwrap_or_else(|| format!("denied by rule '{}'", rule.id)),
                },
            };
            return Ok(verdict);
        }

        warn!(
            action = %ctx.action,
            role = %ctx.role,
            actor_id = %ctx.actor_id,
            "no policy rule matched; denying by default"
        );

        Ok(PolicyVerdict::Deny {
            reason: format!(
                "denied by default: no policy rule lets role '{}' {}",
                ctx.role, ctx.action
            ),
        })
    }
}
