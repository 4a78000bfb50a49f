//! In-memory external collaborators for the reference runtime.
//!
//! Each type implements one of the collaborator traits from
//! `rxflow_core::traits` and keeps enough state for a scenario to print or
//! assert on what the pipeline asked of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use rxflow_contracts::{
    actor::Role,
    clinical::PatientProfile,
    dispense::{Batch, LabelArtifact, Notification, SaleDraftRequest},
    error::{RxError, RxResult},
    ids::{ActorId, BatchId, DrugId, LabelId, PatientId, SaleDraftId},
    prescription::{Prescription, StockAllocation},
};
use rxflow_core::traits::{
    IdentityService, Inventory, LabelPrinter, Notifier, PatientDirectory, SaleDrafts,
};

use crate::mock_data::StaffMember;

fn lock<'a, T>(m: &'a Mutex<T>, who: &'static str) -> RxResult<MutexGuard<'a, T>> {
    m.lock()
        .map_err(|e| RxError::collaborator(who, format!("lock poisoned: {}", e)))
}

// ── Inventory ─────────────────────────────────────────────────────────────────

struct StockedBatch {
    /// `available` is the reservable count.
    batch: Batch,
    /// Physical units on the shelf. Falls only on deduct.
    on_hand: u32,
}

/// Batch ledger with separate reservable and physical counts.
pub struct InMemoryInventory {
    batches: Mutex<Vec<StockedBatch>>,
}

impl InMemoryInventory {
    pub fn new(batches: Vec<Batch>) -> Self {
        let batches = batches
            .into_iter()
            .map(|batch| StockedBatch {
                on_hand: batch.available,
                batch,
            })
            .collect();
        Self {
            batches: Mutex::new(batches),
        }
    }

    /// Book in a delivered batch.
    pub fn receive(&self, batch: Batch) -> RxResult<()> {
        let mut batches = lock(&self.batches, "inventory")?;
        if batches.iter().any(|b| b.batch.id == batch.id) {
            return Err(RxError::conflict(format!("batch '{}' already received", batch.id)));
        }
        info!(batch_id = %batch.id, drug_id = %batch.drug_id, units = batch.available, "batch received");
        batches.push(StockedBatch {
            on_hand: batch.available,
            batch,
        });
        Ok(())
    }

    /// Reservable units in `batch_id`.
    pub fn available(&self, batch_id: &str) -> RxResult<u32> {
        self.with_batch(batch_id, |b| b.batch.available)
    }

    /// Physical units in `batch_id`.
    pub fn on_hand(&self, batch_id: &str) -> RxResult<u32> {
        self.with_batch(batch_id, |b| b.on_hand)
    }

    fn with_batch<R>(&self, batch_id: &str, f: impl FnOnce(&StockedBatch) -> R) -> RxResult<R> {
        lock(&self.batches, "inventory")?
            .iter()
            .find(|b| b.batch.id.as_str() == batch_id)
            .map(f)
            .ok_or_else(|| RxError::not_found("batch", batch_id))
    }
}

impl Inventory for InMemoryInventory {
    fn batch_lookup(&self, drug_id: &DrugId) -> RxResult<Vec<Batch>> {
        let mut found: Vec<Batch> = lock(&self.batches, "inventory")?
            .iter()
            .filter(|b| &b.batch.drug_id == drug_id)
            .map(|b| b.batch.clone())
            .collect();
        found.sort_by(|a, b| a.expiry.cmp(&b.expiry).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    fn reserve(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()> {
        let mut batches = lock(&self.batches, "inventory")?;
        let entry = batches
            .iter_mut()
            .find(|b| &b.batch.id == batch_id)
            .ok_or_else(|| RxError::not_found("batch", batch_id))?;
        if entry.batch.available < quantity {
            return Err(RxError::collaborator(
                "inventory",
                format!(
                    "batch '{}' has {} reservable, {} requested",
                    batch_id, entry.batch.available, quantity
                ),
            ));
        }
        entry.batch.available -= quantity;
        debug!(batch_id = %batch_id, quantity, left = entry.batch.available, "stock reserved");
        Ok(())
    }

    fn release_reservation(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()> {
        let mut batches = lock(&self.batches, "inventory")?;
        let entry = batches
            .iter_mut()
            .find(|b| &b.batch.id == batch_id)
            .ok_or_else(|| RxError::not_found("batch", batch_id))?;
        entry.batch.available = entry.batch.available.saturating_add(quantity);
        debug!(batch_id = %batch_id, quantity, "reservation released");
        Ok(())
    }

    fn deduct(&self, allocations: &[StockAllocation]) -> RxResult<()> {
        let mut batches = lock(&self.batches, "inventory")?;

        let mut wanted: HashMap<&BatchId, u32> = HashMap::new();
        for a in allocations {
            *wanted.entry(&a.batch_id).or_default() += a.quantity;
        }
        for (batch_id, qty) in &wanted {
            let on_hand = batches
                .iter()
                .find(|b| &b.batch.id == *batch_id)
                .map(|b| b.on_hand)
                .ok_or_else(|| RxError::not_found("batch", batch_id))?;
            if on_hand < *qty {
                return Err(RxError::collaborator(
                    "inventory",
                    format!("batch '{}' has {} on hand, {} to deduct", batch_id, on_hand, qty),
                ));
            }
        }

        for entry in batches.iter_mut() {
            if let Some(qty) = wanted.get(&entry.batch.id) {
                entry.on_hand -= qty;
            }
        }
        info!(lines = allocations.len(), "stock deducted");
        Ok(())
    }

    fn restock(&self, allocations: &[StockAllocation]) -> RxResult<()> {
        let mut batches = lock(&self.batches, "inventory")?;
        for a in allocations {
            if let Some(entry) = batches.iter_mut().find(|b| b.batch.id == a.batch_id) {
                entry.on_hand = entry.on_hand.saturating_add(a.quantity);
            }
        }
        warn!(lines = allocations.len(), "stock restocked after aborted release");
        Ok(())
    }
}

// ── Sale drafts ───────────────────────────────────────────────────────────────

/// A draft as the counter sees it.
#[derive(Debug, Clone)]
pub struct DraftEntry {
    pub id: SaleDraftId,
    pub request: SaleDraftRequest,
    pub cancelled: bool,
}

#[derive(Default)]
pub struct RecordingSaleDrafts {
    drafts: Mutex<Vec<DraftEntry>>,
    offline: AtomicBool,
}

impl RecordingSaleDrafts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the point of sale being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn drafts(&self) -> RxResult<Vec<DraftEntry>> {
        Ok(lock(&self.drafts, "sale drafts")?.clone())
    }

    pub fn open_drafts(&self) -> RxResult<Vec<DraftEntry>> {
        Ok(self.drafts()?.into_iter().filter(|d| !d.cancelled).collect())
    }
}

impl SaleDrafts for RecordingSaleDrafts {
    fn create(&self, request: &SaleDraftRequest) -> RxResult<SaleDraftId> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RxError::collaborator("sale drafts", "point of sale unreachable"));
        }
        let mut drafts = lock(&self.drafts, "sale drafts")?;
        let id = SaleDraftId::new(format!("SD-{:05}", drafts.len() + 1));
        drafts.push(DraftEntry {
            id: id.clone(),
            request: request.clone(),
            cancelled: false,
        });
        debug!(sale_draft_id = %id, subtotal_minor = request.subtotal_minor, "sale draft created");
        Ok(id)
    }

    fn cancel(&self, draft_id: &SaleDraftId) -> RxResult<()> {
        let mut drafts = lock(&self.drafts, "sale drafts")?;
        let draft = drafts
            .iter_mut()
            .find(|d| &d.id == draft_id)
            .ok_or_else(|| RxError::not_found("sale draft", draft_id))?;
        draft.cancelled = true;
        Ok(())
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

/// Collects notifications instead of sending SMS.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the SMS gateway timing out.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> RxResult<Vec<Notification>> {
        Ok(lock(&self.sent, "notifier")?.clone())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> RxResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RxError::collaborator("notifier", "SMS gateway timeout"));
        }
        lock(&self.sent, "notifier")?.push(notification.clone());
        Ok(())
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Fixed staff roster with per-actor PINs.
pub struct StaticIdentity {
    staff: HashMap<ActorId, StaffMember>,
}

impl StaticIdentity {
    pub fn new(staff: Vec<StaffMember>) -> Self {
        Self {
            staff: staff.into_iter().map(|m| (m.actor_id.clone(), m)).collect(),
        }
    }
}

impl IdentityService for StaticIdentity {
    fn role_of(&self, actor_id: &ActorId) -> Option<Role> {
        self.staff.get(actor_id).map(|m| m.role)
    }

    fn verify_pin(&self, actor_id: &ActorId, pin: &str) -> bool {
        self.staff.get(actor_id).is_some_and(|m| m.pin == pin)
    }
}

// ── Patients ──────────────────────────────────────────────────────────────────

pub struct StaticPatients {
    profiles: HashMap<PatientId, PatientProfile>,
}

impl StaticPatients {
    pub fn new(profiles: Vec<PatientProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.patient_id.clone(), p))
                .collect(),
        }
    }
}

impl PatientDirectory for StaticPatients {
    fn profile(&self, patient_id: &PatientId) -> RxResult<PatientProfile> {
        self.profiles
            .get(patient_id)
            .cloned()
            .ok_or_else(|| RxError::not_found("patient", patient_id))
    }
}

// ── Labels ────────────────────────────────────────────────────────────────────

/// Numbers labels sequentially.
#[derive(Default)]
pub struct SequentialLabelPrinter {
    printed: AtomicUsize,
}

impl SequentialLabelPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn printed(&self) -> usize {
        self.printed.load(Ordering::SeqCst)
    }
}

impl LabelPrinter for SequentialLabelPrinter {
    fn generate(&self, prescription: &Prescription, at: DateTime<Utc>) -> RxResult<LabelArtifact> {
        let n = self.printed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LabelArtifact {
            id: LabelId::new(format!("LBL-{:06}", n)),
            prescription_id: prescription.id,
            printed_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_data::{opening_stock, staff, PHARMACIST};
    use rxflow_contracts::ids::LineId;

    fn allocation(batch: &str, quantity: u32) -> StockAllocation {
        StockAllocation {
            line_id: LineId::new("l1"),
            drug_id: DrugId::new("amox-500"),
            batch_id: BatchId::new(batch),
            quantity,
            unit_mrp_minor: 450,
        }
    }

    /// Batches come back earliest expiry first.
    #[test]
    fn test_batch_lookup_is_fefo() {
        let inventory = InMemoryInventory::new(opening_stock());
        let batches = inventory.batch_lookup(&DrugId::new("amox-500")).unwrap();
        let ids: Vec<&str> = batches.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["amox-b1", "amox-b2"]);
    }

    /// Reserving more than is reservable fails and leaves the count alone.
    #[test]
    fn test_reserve_respects_available() {
        let inventory = InMemoryInventory::new(opening_stock());
        let result = inventory.reserve(&BatchId::new("amox-b1"), 13);
        assert!(matches!(result, Err(RxError::Collaborator { .. })));
        assert_eq!(inventory.available("amox-b1").unwrap(), 12);

        inventory.reserve(&BatchId::new("amox-b1"), 10).unwrap();
        assert_eq!(inventory.available("amox-b1").unwrap(), 2);
        inventory.release_reservation(&BatchId::new("amox-b1"), 10).unwrap();
        assert_eq!(inventory.available("amox-b1").unwrap(), 12);
    }

    /// A deduct that cannot be fully satisfied changes nothing.
    #[test]
    fn test_deduct_is_all_or_nothing() {
        let inventory = InMemoryInventory::new(opening_stock());
        let result = inventory.deduct(&[allocation("amox-b2", 5), allocation("amox-b1", 50)]);
        assert!(result.is_err());
        assert_eq!(inventory.on_hand("amox-b2").unwrap(), 200);

        inventory.deduct(&[allocation("amox-b2", 5)]).unwrap();
        assert_eq!(inventory.on_hand("amox-b2").unwrap(), 195);
        inventory.restock(&[allocation("amox-b2", 5)]).unwrap();
        assert_eq!(inventory.on_hand("amox-b2").unwrap(), 200);
    }

    /// PINs are checked per actor.
    #[test]
    fn test_identity_checks_pin_per_actor() {
        let identity = StaticIdentity::new(staff());
        let pharmacist = ActorId::new(PHARMACIST);
        assert_eq!(identity.role_of(&pharmacist), Some(Role::Pharmacist));
        assert!(identity.verify_pin(&pharmacist, "4821"));
        assert!(!identity.verify_pin(&pharmacist, "7305"));
        assert!(!identity.verify_pin(&ActorId::new("nobody"), "4821"));
        assert_eq!(identity.role_of(&ActorId::new("nobody")), None);
    }

    /// Unknown patients surface as NotFound.
    #[test]
    fn test_unknown_patient_is_not_found() {
        let patients = StaticPatients::new(vec![]);
        let result = patients.profile(&PatientId::new("pat-x"));
        assert!(matches!(result, Err(RxError::NotFound { entity: "patient", .. })));
    }
}
