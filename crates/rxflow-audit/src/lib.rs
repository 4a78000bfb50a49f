//! # rxflow-audit
//!
//! Immutable, append-only, SHA-256 hash-chained records for the rxflow
//! pipeline: the transition log and the override ledger.
//!
//! ## Overview
//!
//! Every transition the pipeline commits or denies is wrapped in a
//! `ChainEntry` that links to the previous entry via its SHA-256 hash.
//! Override records are chained the same way on their own stream.
//! Tampering with any entry, even a single byte, breaks the chain and is
//! detected by `verify_chain`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rxflow_audit::{InMemoryAuditWriter, InMemoryOverrideLedger};
//!
//! let audit = Arc::new(InMemoryAuditWriter::new("transitions"));
//! let ledger = Arc::new(InMemoryOverrideLedger::new());
//! // hand Box::new(Arc::clone(&audit)) to the pipeline, then later:
//! assert!(audit.verify_integrity());
//! let log = audit.export_log()?;
//! ```

pub mod chain;
pub mod event;
pub mod ledger;
pub mod memory;

pub use chain::{hash_entry, verify_chain};
pub use event::{AuditEvent, AuditLog, ChainEntry, GENESIS_HASH};
pub use ledger::InMemoryOverrideLedger;
pub use memory::InMemoryAuditWriter;

// ── Tests ─────────────────────────────────────────────────────────────────────
