//! # rxflow-ref-pharmacy
//!
//! Pharmacy reference runtime for the rxflow prescription pipeline.
//!
//! Wires the real policy engine, clinical evaluator, audit chain, and
//! override ledger to in-memory collaborators (stock ledger, point of sale,
//! SMS, identity, patient directory, label printer) and demonstrates four
//! scenarios:
//!
//! 1. **Allergy and Interaction Override**: hard blocks, PIN-verified
//!    overrides, and the override ledger.
//! 2. **Release and Handoff**: FEFO reservation, the release gate, sale
//!    draft, refill date, and the six-field handoff checklist.
//! 3. **Clarification and Stock Holds**: clarify, revise, resume, and
//!    overdue hold reminders.
//! 4. **Concurrent Accept**: optimistic versioning under a race.
//!
//! All data is hardcoded and fictional. No external systems are contacted.

pub mod collaborators;
pub mod mock_data;
pub mod runtime;
pub mod scenarios;

pub use runtime::PharmacyRuntime;
