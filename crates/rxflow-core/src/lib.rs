//! # rxflow-core
//!
//! The prescription pipeline runtime.
//!
//! This crate provides:
//! - The trait seams to trusted components and external collaborators
//! - `Pipeline`, the single writer of prescription stage, with its release
//!   gate, hold registry, and handoff checklist
//! - The queue projector used by dashboards
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rxflow_core::{Pipeline, TrustedComponents, Collaborators, PipelineSettings};
//!
//! let pipeline = Pipeline::new(trusted, collaborators, PipelineSettings::default());
//! let rx = pipeline.intake(new_prescription, &actor)?;
//! let rx = pipeline.advance(&rx.id, rx.version, &actor)?;
//! ```

pub mod handoff;
pub mod hold;
pub mod pipeline;
pub mod queue;
pub mod release;
pub mod settings;
pub mod store;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use pipeline::{Collaborators, Pipeline, TrustedComponents};
pub use queue::StageQueue;
pub use settings::PipelineSettings;
pub use store::InMemoryPrescriptionStore;
