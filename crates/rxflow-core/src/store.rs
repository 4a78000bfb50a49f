//! In-memory implementation of `PrescriptionStore`.
//!
//! The mutex guards only the map itself for the duration of a single read or
//! compare-and-swap; it is the storage primitive, not a pipeline lock.
//! Serialization of competing transitions comes from the version check.

use std::collections::HashMap;
use std::sync::Mutex;

use rxflow_contracts::{
    error::{RxError, RxResult},
    ids::PrescriptionId,
    prescription::Prescription,
};

use crate::traits::PrescriptionStore;

#[derive(Default)]
pub struct InMemoryPrescriptionStore {
    records: Mutex<HashMap<PrescriptionId, Prescription>>,
}

impl InMemoryPrescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RxResult<std::sync::MutexGuard<'_, HashMap<PrescriptionId, Prescription>>> {
        self.records.lock().map_err(|e| {
            RxError::collaborator("prescription store", format!("lock poisoned: {}", e))
        })
    }
}

impl PrescriptionStore for InMemoryPrescriptionStore {
    fn insert(&self, prescription: Prescription) -> RxResult<()> {
        let mut records = self.lock()?;
        if records.contains_key(&prescription.id) {
            return Err(RxError::conflict(format!(
                "prescription '{}' already exists",
                prescription.id
            )));
        }
        records.insert(prescription.id, prescription);
        Ok(())
    }

    fn get(&self, id: &PrescriptionId) -> RxResult<Prescription> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| RxError::not_found("prescription", id))
    }

    fn compare_and_swap(&self, expected_version: u64, next: Prescription) -> RxResult<()> {
        if next.version != expected_version + 1 {
            return Err(RxError::invalid_state(format!(
                "replacement for prescription '{}' must carry version {}, got {}",
                next.id,
                expected_version + 1,
                next.version
            )));
        }

        let mut records = self.lock()?;
        let current = records
            .get_mut(&next.id)
            .ok_or_else(|| RxError::not_found("prescription", next.id))?;

        if current.version != expected_version {
            return Err(RxError::conflict(format!(
                "prescription '{}' is at version {}, request was based on version {}",
                next.id, current.version, expected_version
            )));
        }

        *current = next;
        Ok(())
    }

    fn all(&self) -> RxResult<Vec<Prescription>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}
