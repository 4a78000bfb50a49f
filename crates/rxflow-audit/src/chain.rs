//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. stream name as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. canonical JSON of record (serde_json with no pretty-printing)

use serde::Serialize;
use sha2::{Digest, Sha256};

use rxflow_contracts::error::{RxError, RxResult};

use crate::event::{ChainEntry, GENESIS_HASH};

/// Compute the SHA-256 hash for a single chain entry.
///
/// Returns a lowercase 64-character hex string, or `AuditWriteFailed` if
/// `record` cannot be serialized.
pub fn hash_entry<T: Serialize>(
    stream: &str,
    sequence: u64,
    record: &T,
    prev_hash: &str,
) -> RxResult<String> {
    let record_json = serde_json::to_vec(record).map_err(|e| RxError::AuditWriteFailed {
        reason: format!("record could not be serialized: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(stream.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&record_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify the integrity of a hash chain.
///
/// Valid when every entry's `prev_hash` equals the preceding `this_hash`
/// (or `GENESIS_HASH` for entry 0), every `this_hash` matches the value
/// recomputed from the entry's own fields, and sequences run 0, 1, 2, …
/// An empty chain is valid.
pub fn verify_chain<T: Serialize>(entries: &[ChainEntry<T>]) -> bool {
    let mut expected_prev = GENESIS_HASH.to_string();

    for (position, entry) in entries.iter().enumerate() {
        if entry.sequence != position as u64 || entry.prev_hash != expected_prev {
            return false;
        }

        match hash_entry(&entry.stream, entry.sequence, &entry.record, &entry.prev_hash) {
            Ok(recomputed) if recomputed == entry.this_hash => {}
            _ => return false,
        }

        expected_prev = entry.this_hash.clone();
    }

    true
}

/// An append-only chain of `T`.
///
/// Not synchronized; owners wrap it in a `Mutex`.
pub(crate) struct HashChain<T> {
    stream: String,
    pub(crate) entries: Vec<ChainEntry<T>>,
    last_hash: String,
}

impl<T: Serialize + Clone> HashChain<T> {
    pub(crate) fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            entries: Vec::new(),
            last_hash: GENESIS_HASH.to_string(),
        }
    }

    pub(crate) fn stream(&self) -> &str {
        &self.stream
    }

    pub(crate) fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Hash and append `record`. Nothing is appended on error.
    pub(crate) fn append(&mut self, record: T) -> RxResult<&ChainEntry<T>> {
        let sequence = self.entries.len() as u64;
        let prev_hash = self.last_hash.clone();
        let this_hash = hash_entry(&self.stream, sequence, &record, &prev_hash)?;

        self.entries.push(ChainEntry {
            sequence,
            stream: self.stream.clone(),
            record,
            prev_hash,
            this_hash: this_hash.clone(),
        });
        self.last_hash = this_hash;

        let idx = self.entries.len() - 1;
        Ok(&self.entries[idx])
    }

    pub(crate) fn verify(&self) -> bool {
        verify_chain(&self.entries)
    }
}
