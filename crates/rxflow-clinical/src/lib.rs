//! # rxflow-clinical
//!
//! Clinical safety evaluation for the rxflow pipeline.
//!
//! This crate provides [`engine::ReferenceEvaluator`], which implements the
//! [`rxflow_core::traits::ClinicalEvaluator`] trait against a reference table
//! of drugs, interacting ingredient pairs, and age-banded dose ranges loaded
//! from TOML.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use rxflow_clinical::ReferenceEvaluator;
//!
//! let evaluator = ReferenceEvaluator::from_file(Path::new("reference/clinical.toml"))?;
//! let flags = evaluator.evaluate(&prescription, &patient);
//! if !flags.blocking_lines().is_empty() { /* override or clarify */ }
//! ```

pub mod dose;
pub mod engine;
pub mod reference;

pub use engine::ReferenceEvaluator;
pub use reference::{AgeBand, ClinicalReference, DoseRange, DrugEntry, InteractionEntry, Severity};
