//! Chain entry and exported log types.
//!
//! `ChainEntry` wraps one appended record (a transition or an override) with
//! sequence numbering and the SHA-256 hashes that make tampering detectable.
//! `AuditLog` is the snapshot handed out by `InMemoryAuditWriter::export_log`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxflow_contracts::audit::TransitionRecord;

/// The sentinel `prev_hash` used for the first entry in every chain.
///
/// 64 hex zeros: a value that can never be the SHA-256 of real data.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A single entry in a SHA-256 hash chain.
///
/// Each entry commits to the previous one via `prev_hash`.  Modifying any
/// field, including those of the embedded `record`, invalidates `this_hash`
/// and every later `prev_hash`, which `verify_chain` detects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry<T> {
    /// Position in the chain, starting at 0.
    pub sequence: u64,

    /// The chain this entry belongs to (e.g. `"transitions"`, `"overrides"`).
    pub stream: String,

    pub record: T,

    /// Hash of the previous entry, or `GENESIS_HASH` for the first.
    pub prev_hash: String,

    /// Computed by `hash_entry()` over (stream, sequence, prev_hash,
    /// canonical JSON of record).
    pub this_hash: String,
}

pub type AuditEvent = ChainEntry<TransitionRecord>;

/// A snapshot of the transition log.
///
/// `terminal_hash` is the `this_hash` of the last entry and commits to the
/// whole log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub stream: String,

    /// All entries in chain order (sequence 0 first).
    pub events: Vec<AuditEvent>,

    pub exported_at: DateTime<Utc>,

    /// Empty string if the log is empty.
    pub terminal_hash: String,
}
