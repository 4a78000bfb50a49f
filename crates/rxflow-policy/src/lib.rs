//! # rxflow-policy
//!
//! A TOML-driven, deny-by-default role policy engine for the rxflow pipeline.
//!
//! ## Overview
//!
//! This crate provides [`TomlPolicyEngine`], which implements the
//! [`PolicyEngine`](rxflow_core::traits::PolicyEngine) trait.  Rules are
//! declared in a TOML file, evaluated in order, and the first matching rule
//! wins.  If no rule matches, the request is denied.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use rxflow_policy::engine::TomlPolicyEngine;
//!
//! let engine = TomlPolicyEngine::from_file(Path::new("policies/pharmacy.toml"))?;
//! // Pass `engine` to `rxflow_core::Pipeline::new(...)`.
//! ```
//!
//! ## Rule matching
//!
//! Each rule names an `action` (or `"*"`), a list of `roles` (`"*"` for any),
//! and optionally the `stages` it applies to.  Rules are applied in
//! declaration order; the first match wins.

pub mod engine;
pub mod rule;

pub use engine::TomlPolicyEngine;
pub use rule::{PolicyConfig, PolicyRule, RuleVerdict};

// ── Tests ─────────────────────────────────────────────────────────────────────
