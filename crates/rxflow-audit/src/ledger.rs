//! In-memory implementation of `OverrideLedger`.
//!
//! Override records share the transition log's hash-chain construction, on
//! their own `"overrides"` stream.  The ledger is the only place an override
//! is validated: a request with an unverified PIN or a blank rationale is
//! refused and leaves no record.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::{info, warn};

use rxflow_contracts::{
    error::{RxError, RxResult},
    ids::{OverrideId, PrescriptionId},
    overrides::{OverrideRecord, OverrideRequest, OverrideToken},
};
use rxflow_core::traits::OverrideLedger;

use crate::{chain::HashChain, event::ChainEntry};

pub struct InMemoryOverrideLedger {
    pub(crate) state: Mutex<HashChain<OverrideRecord>>,
}

impl Default for InMemoryOverrideLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOverrideLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashChain::new("overrides")),
        }
    }

    fn lock(&self) -> RxResult<MutexGuard<'_, HashChain<OverrideRecord>>> {
        self.state.lock().map_err(|e| RxError::AuditWriteFailed {
            reason: format!("override ledger lock poisoned: {}", e),
        })
    }

    /// Every chained entry, in append order.
    pub fn entries(&self) -> RxResult<Vec<ChainEntry<OverrideRecord>>> {
        Ok(self.lock()?.entries.clone())
    }

    /// Hash of the most recent entry, or the genesis hash when empty.
    pub fn head(&self) -> RxResult<String> {
        Ok(self.lock()?.last_hash().to_string())
    }

    pub fn verify_integrity(&self) -> bool {
        self.lock().map(|state| state.verify()).unwrap_or(false)
    }
}

impl OverrideLedger for InMemoryOverrideLedger {
    fn record_override(&self, request: OverrideRequest) -> RxResult<OverrideToken> {
        if !request.pin_verified {
            warn!(
                prescription_id = %request.prescription_id,
                line_id = %request.line_id,
                actor = %request.actor_id,
                "override refused: PIN not verified"
            );
            return Err(RxError::validation("pharmacist PIN could not be verified"));
        }

        let rationale = request.rationale.trim();
        if rationale.is_empty() {
            return Err(RxError::validation("clinical rationale is required"));
        }

        let record = OverrideRecord {
            id: OverrideId::new(),
            prescription_id: request.prescription_id,
            line_id: request.line_id,
            actor_id: request.actor_id,
            actor_role: request.actor_role,
            rationale: rationale.to_string(),
            pin_verified: true,
            timestamp: Utc::now(),
        };

        let mut state = self.lock()?;
        let entry = state.append(record)?;
        info!(
            override_id = %entry.record.id,
            prescription_id = %entry.record.prescription_id,
            line_id = %entry.record.line_id,
            actor = %entry.record.actor_id,
            sequence = entry.sequence,
            "override recorded"
        );
        Ok(entry.record.token())
    }

    fn records_for(&self, prescription_id: &PrescriptionId) -> RxResult<Vec<OverrideRecord>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|e| &e.record.prescription_id == prescription_id)
            .map(|e| e.record.clone())
            .collect())
    }
}
