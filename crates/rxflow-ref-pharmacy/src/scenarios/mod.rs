//! Pharmacy reference runtime demo scenarios.
//!
//! Each scenario builds a fresh `PharmacyRuntime` (real policy engine,
//! clinical evaluator, audit chain, and override ledger over in-memory
//! collaborators) and walks one prescription pattern end to end.

pub mod allergy_override;
pub mod concurrent_accept;
pub mod hold_reminder;
pub mod release_flow;
