//! # rxflow-contracts
//!
//! Shared types, identifiers, and the error taxonomy for the rxflow
//! prescription fulfillment pipeline.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions, small derived helpers, and error types.

pub mod actor;
pub mod audit;
pub mod clinical;
pub mod dispense;
pub mod error;
pub mod hold;
pub mod ids;
pub mod overrides;
pub mod policy;
pub mod prescription;
