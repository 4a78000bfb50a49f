//! In-memory implementation of `AuditWriter`.
//!
//! `InMemoryAuditWriter` keeps every transition record in a hash chain
//! behind a `Mutex`, so one writer can be shared by every thread driving the
//! pipeline.
//!
//! Use `export_log()` to obtain a snapshot `AuditLog`, and
//! `verify_integrity()` at any time to confirm the chain has not been
//! tampered with in memory.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use rxflow_contracts::{
    audit::TransitionRecord,
    error::{RxError, RxResult},
};
use rxflow_core::traits::AuditWriter;

use crate::{chain::HashChain, event::AuditLog};

/// An in-memory, append-only audit writer backed by a SHA-256 hash chain.
pub struct InMemoryAuditWriter {
    pub(crate) state: Mutex<HashChain<TransitionRecord>>,
}

impl InMemoryAuditWriter {
    /// Create an empty log whose entries are hashed under `stream`.
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(HashChain::new(stream)),
        }
    }

    fn lock(&self) -> RxResult<MutexGuard<'_, HashChain<TransitionRecord>>> {
        self.state.lock().map_err(|e| RxError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })
    }

    /// Snapshot of every entry written so far.
    pub fn export_log(&self) -> RxResult<AuditLog> {
        let state = self.lock()?;
        Ok(AuditLog {
            stream: state.stream().to_string(),
            events: state.entries.clone(),
            exported_at: Utc::now(),
            terminal_hash: state
                .entries
                .last()
                .map(|e| e.this_hash.clone())
                .unwrap_or_default(),
        })
    }

    /// The transition records alone, in append order.
    pub fn records(&self) -> RxResult<Vec<TransitionRecord>> {
        Ok(self.lock()?.entries.iter().map(|e| e.record.clone()).collect())
    }

    /// Verify that the in-memory chain has not been tampered with.
    pub fn verify_integrity(&self) -> bool {
        self.lock().map(|state| state.verify()).unwrap_or(false)
    }
}

impl AuditWriter for InMemoryAuditWriter {
    /// Append one transition record to the hash chain.
    fn write(&self, record: &TransitionRecord) -> RxResult<()> {
        let mut state = self.lock()?;
        let entry = state.append(record.clone())?;
        debug!(
            sequence = entry.sequence,
            subject = %record.subject,
            action = %record.action,
            "audit record appended"
        );
        Ok(())
    }
}
