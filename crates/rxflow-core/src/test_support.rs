//! Mock collaborators and a wired-up pipeline for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};

use rxflow_contracts::{
    actor::Role,
    audit::{PipelineAction, TransitionOutcome, TransitionRecord},
    clinical::{ClinicalFlagSet, PatientProfile},
    dispense::{Batch, LabelArtifact, Notification, SaleDraftRequest},
    error::{RxError, RxResult},
    ids::{
        ActorId, BatchId, ClinicianId, DrugId, LabelId, LineId, OverrideId, PatientId,
        PrescriptionId, SaleDraftId,
    },
    overrides::{OverrideRecord, OverrideRequest, OverrideToken},
    policy::{PolicyContext, PolicyVerdict},
    prescription::{LineItem, NewPrescription, Prescription, Priority, StockAllocation},
};

use crate::{
    pipeline::{Collaborators, Pipeline, TrustedComponents},
    settings::PipelineSettings,
    store::InMemoryPrescriptionStore,
    traits::{
        AuditWriter, ClinicalEvaluator, IdentityService, Inventory, LabelPrinter, Notifier,
        OverrideLedger, PatientDirectory, PolicyEngine, SaleDrafts,
    },
};

pub(crate) const PIN: &str = "1234";

// ── Actors ────────────────────────────────────────────────────────────────────

pub(crate) fn pharmacist() -> ActorId {
    ActorId::new("pharm-1")
}

pub(crate) fn technician() -> ActorId {
    ActorId::new("tech-1")
}

pub(crate) fn cashier() -> ActorId {
    ActorId::new("cash-1")
}

pub(crate) fn admin() -> ActorId {
    ActorId::new("admin-1")
}

pub(crate) fn stranger() -> ActorId {
    ActorId::new("nobody")
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub(crate) fn line(id: &str, drug: &str, quantity: u32) -> LineItem {
    LineItem {
        id: LineId::new(id),
        drug_id: DrugId::new(drug),
        dose: "500 mg".to_string(),
        frequency: "twice daily".to_string(),
        route: "oral".to_string(),
        duration_days: None,
        quantity,
        instructions: "after food".to_string(),
    }
}

pub(crate) fn new_rx(lines: Vec<LineItem>) -> NewPrescription {
    NewPrescription {
        patient_id: PatientId::new("pat-1"),
        clinician_id: ClinicianId::new("dr-1"),
        lines,
        priority: Priority::Normal,
    }
}

fn batch(id: &str, drug: &str, expiry: NaiveDate, available: u32) -> Batch {
    Batch {
        id: BatchId::new(id),
        drug_id: DrugId::new(drug),
        batch_number: id.to_uppercase(),
        expiry,
        available,
        unit_mrp_minor: 250,
    }
}

fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 12, 31).unwrap()
}

// ── Clinical evaluator ────────────────────────────────────────────────────────

/// Returns whichever flags the test configured, limited to lines present on
/// the prescription.
#[derive(Default)]
pub(crate) struct MockEvaluator {
    flags: Mutex<ClinicalFlagSet>,
}

impl MockEvaluator {
    pub(crate) fn flag_allergy(&self, line_id: &str) {
        self.flags.lock().unwrap().allergy_matches.insert(LineId::new(line_id));
    }

    pub(crate) fn flag_interaction(&self, line_id: &str) {
        self.flags.lock().unwrap().interactions.insert(LineId::new(line_id));
    }

    pub(crate) fn flag_dose(&self, line_id: &str) {
        self.flags.lock().unwrap().dose_out_of_range.insert(LineId::new(line_id));
    }
}

impl ClinicalEvaluator for MockEvaluator {
    fn evaluate(&self, prescription: &Prescription, _patient: &PatientProfile) -> ClinicalFlagSet {
        let configured = self.flags.lock().unwrap().clone();
        let present = |l: &LineId| prescription.line(l).is_some();
        ClinicalFlagSet {
            allergy_matches: configured.allergy_matches.into_iter().filter(present).collect(),
            interactions: configured.interactions.into_iter().filter(present).collect(),
            dose_out_of_range: configured.dose_out_of_range.into_iter().filter(present).collect(),
        }
    }
}

// ── Policy ────────────────────────────────────────────────────────────────────

/// Allows everything except the configured `(role, action)` pairs.
#[derive(Default)]
pub(crate) struct MockPolicy {
    denied: Mutex<Vec<(String, String)>>,
}

impl MockPolicy {
    pub(crate) fn deny(&self, role: Role, action: PipelineAction) {
        self.denied
            .lock()
            .unwrap()
            .push((role.as_str().to_string(), action.as_str().to_string()));
    }
}

impl PolicyEngine for MockPolicy {
    fn evaluate(&self, ctx: &PolicyContext) -> RxResult<PolicyVerdict> {
        let denied = self
            .denied
            .lock()
            .unwrap()
            .iter()
            .any(|(role, action)| role == &ctx.role && action == &ctx.action);
        if denied {
            Ok(PolicyVerdict::Deny {
                reason: format!("{} may not {}", ctx.role, ctx.action),
            })
        } else {
            Ok(PolicyVerdict::Allow)
        }
    }
}

// ── Audit ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingAudit {
    pub(crate) records: Mutex<Vec<TransitionRecord>>,
    fail_on: Mutex<Option<PipelineAction>>,
}

impl RecordingAudit {
    /// Refuse every committed record for `action` until cleared.
    pub(crate) fn fail_committed(&self, action: PipelineAction) {
        *self.fail_on.lock().unwrap() = Some(action);
    }

    pub(crate) fn clear_failure(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub(crate) fn denials(&self) -> Vec<TransitionRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r.outcome, TransitionOutcome::Denied { .. }))
            .cloned()
            .collect()
    }

    pub(crate) fn count(&self, action: PipelineAction) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.action == action)
            .count()
    }
}

impl AuditWriter for RecordingAudit {
    fn write(&self, record: &TransitionRecord) -> RxResult<()> {
        let refused = *self.fail_on.lock().unwrap() == Some(record.action)
            && matches!(record.outcome, TransitionOutcome::Committed { .. });
        if refused {
            return Err(RxError::AuditWriteFailed {
                reason: "disk full".to_string(),
            });
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ── Override ledger ───────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockLedger {
    pub(crate) records: Mutex<Vec<OverrideRecord>>,
}

impl OverrideLedger for MockLedger {
    fn record_override(&self, request: OverrideRequest) -> RxResult<OverrideToken> {
        if !request.pin_verified {
            return Err(RxError::validation("pharmacist PIN could not be verified"));
        }
        if request.rationale.trim().is_empty() {
            return Err(RxError::validation("clinical rationale is required"));
        }
        let record = OverrideRecord {
            id: OverrideId::new(),
            prescription_id: request.prescription_id,
            line_id: request.line_id,
            actor_id: request.actor_id,
            actor_role: request.actor_role,
            rationale: request.rationale,
            pin_verified: request.pin_verified,
            timestamp: Utc::now(),
        };
        let token = record.token();
        self.records.lock().unwrap().push(record);
        Ok(token)
    }

    fn records_for(&self, prescription_id: &PrescriptionId) -> RxResult<Vec<OverrideRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.prescription_id == prescription_id)
            .cloned()
            .collect())
    }
}

// ── Inventory ─────────────────────────────────────────────────────────────────

/// Batches with a reservable count and a physical on-hand count.
pub(crate) struct MockInventory {
    batches: Mutex<Vec<Batch>>,
    on_hand: Mutex<HashMap<BatchId, u32>>,
    pub(crate) fail_deduct: AtomicBool,
    /// Hold every deduct open briefly so concurrent releases overlap.
    pub(crate) slow_deduct: AtomicBool,
    pub(crate) deducts: AtomicUsize,
}

impl MockInventory {
    fn new(batches: Vec<Batch>) -> Self {
        let on_hand = batches.iter().map(|b| (b.id.clone(), b.available)).collect();
        Self {
            batches: Mutex::new(batches),
            on_hand: Mutex::new(on_hand),
            fail_deduct: AtomicBool::new(false),
            slow_deduct: AtomicBool::new(false),
            deducts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn available(&self, batch_id: &str) -> u32 {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id.as_str() == batch_id)
            .map(|b| b.available)
            .unwrap_or(0)
    }

    pub(crate) fn on_hand(&self, batch_id: &str) -> u32 {
        self.on_hand
            .lock()
            .unwrap()
            .get(&BatchId::new(batch_id))
            .copied()
            .unwrap_or(0)
    }
}

impl Inventory for MockInventory {
    fn batch_lookup(&self, drug_id: &DrugId) -> RxResult<Vec<Batch>> {
        let mut found: Vec<Batch> = self
            .batches
            .lock()
            .unwrap()
            .iter()
            .filter(|b| &b.drug_id == drug_id)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.expiry);
        Ok(found)
    }

    fn reserve(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()> {
        let mut batches = self.batches.lock().unwrap();
        let batch = batches
            .iter_mut()
            .find(|b| &b.id == batch_id)
            .ok_or_else(|| RxError::not_found("batch", batch_id))?;
        if batch.available < quantity {
            return Err(RxError::collaborator("inventory", "insufficient stock"));
        }
        batch.available -= quantity;
        Ok(())
    }

    fn release_reservation(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()> {
        let mut batches = self.batches.lock().unwrap();
        if let Some(batch) = batches.iter_mut().find(|b| &b.id == batch_id) {
            batch.available += quantity;
        }
        Ok(())
    }

    fn deduct(&self, allocations: &[StockAllocation]) -> RxResult<()> {
        self.deducts.fetch_add(1, Ordering::SeqCst);
        if self.slow_deduct.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        if self.fail_deduct.load(Ordering::SeqCst) {
            return Err(RxError::collaborator("inventory", "ledger unavailable"));
        }
        let mut on_hand = self.on_hand.lock().unwrap();
        for a in allocations {
            *on_hand.entry(a.batch_id.clone()).or_default() -= a.quantity;
        }
        Ok(())
    }

    fn restock(&self, allocations: &[StockAllocation]) -> RxResult<()> {
        let mut on_hand = self.on_hand.lock().unwrap();
        for a in allocations {
            *on_hand.entry(a.batch_id.clone()).or_default() += a.quantity;
        }
        Ok(())
    }
}

// ── Sale drafts ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockSaleDrafts {
    pub(crate) created: Mutex<Vec<SaleDraftRequest>>,
    pub(crate) cancelled: Mutex<Vec<SaleDraftId>>,
    pub(crate) fail: AtomicBool,
}

impl SaleDrafts for MockSaleDrafts {
    fn create(&self, request: &SaleDraftRequest) -> RxResult<SaleDraftId> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RxError::collaborator("sale drafts", "POS offline"));
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(SaleDraftId::new(format!("draft-{}", created.len())))
    }

    fn cancel(&self, draft_id: &SaleDraftId) -> RxResult<()> {
        self.cancelled.lock().unwrap().push(draft_id.clone());
        Ok(())
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockNotifier {
    pub(crate) sent: Mutex<Vec<Notification>>,
    pub(crate) attempts: AtomicUsize,
    pub(crate) fail: AtomicBool,
}

impl Notifier for MockNotifier {
    fn send(&self, notification: &Notification) -> RxResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RxError::collaborator("notifier", "SMS gateway timeout"));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ── Identity, labels, patients ────────────────────────────────────────────────

struct MockIdentity {
    roles: HashMap<ActorId, Role>,
}

impl IdentityService for MockIdentity {
    fn role_of(&self, actor_id: &ActorId) -> Option<Role> {
        self.roles.get(actor_id).copied()
    }

    fn verify_pin(&self, actor_id: &ActorId, pin: &str) -> bool {
        self.roles.contains_key(actor_id) && pin == PIN
    }
}

struct MockLabels;

impl LabelPrinter for MockLabels {
    fn generate(&self, prescription: &Prescription, at: DateTime<Utc>) -> RxResult<LabelArtifact> {
        Ok(LabelArtifact {
            id: LabelId::new(format!("label-{}", prescription.id)),
            prescription_id: prescription.id,
            printed_at: at,
        })
    }
}

struct MockPatients;

impl PatientDirectory for MockPatients {
    fn profile(&self, patient_id: &PatientId) -> RxResult<PatientProfile> {
        Ok(PatientProfile {
            patient_id: patient_id.clone(),
            display_name: "Test Patient".to_string(),
            ..Default::default()
        })
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

/// A pipeline plus shared handles to every mock it was built from.
pub(crate) struct Harness {
    pub(crate) pipeline: Pipeline,
    pub(crate) evaluator: Arc<MockEvaluator>,
    pub(crate) policy: Arc<MockPolicy>,
    pub(crate) audit: Arc<RecordingAudit>,
    pub(crate) ledger: Arc<MockLedger>,
    pub(crate) inventory: Arc<MockInventory>,
    pub(crate) drafts: Arc<MockSaleDrafts>,
    pub(crate) notifier: Arc<MockNotifier>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_settings(PipelineSettings::default())
    }

    pub(crate) fn with_settings(settings: PipelineSettings) -> Self {
        let expired = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let evaluator = Arc::new(MockEvaluator::default());
        let policy = Arc::new(MockPolicy::default());
        let audit = Arc::new(RecordingAudit::default());
        let ledger = Arc::new(MockLedger::default());
        let inventory = Arc::new(MockInventory::new(vec![
            batch("amox-a", "amoxicillin", far_future(), 100),
            batch("ibu-a", "ibuprofen", far_future(), 100),
            batch("warf-a", "warfarin", far_future(), 100),
            batch("asp-a", "aspirin", far_future(), 100),
            batch("old-a", "expired-only", expired, 100),
            batch("scarce-a", "scarce", far_future(), 2),
        ]));
        let drafts = Arc::new(MockSaleDrafts::default());
        let notifier = Arc::new(MockNotifier::default());

        let roles = HashMap::from([
            (pharmacist(), Role::Pharmacist),
            (technician(), Role::Technician),
            (cashier(), Role::Cashier),
            (admin(), Role::Admin),
        ]);

        let pipeline = Pipeline::new(
            TrustedComponents {
                store: Box::new(InMemoryPrescriptionStore::new()),
                evaluator: Box::new(Arc::clone(&evaluator)),
                policy: Box::new(Arc::clone(&policy)),
                audit: Box::new(Arc::clone(&audit)),
                ledger: Box::new(Arc::clone(&ledger)),
            },
            Collaborators {
                patients: Box::new(MockPatients),
                inventory: Box::new(Arc::clone(&inventory)),
                sale_drafts: Box::new(Arc::clone(&drafts)),
                notifier: Box::new(Arc::clone(&notifier)),
                identity: Box::new(MockIdentity { roles }),
                labels: Box::new(MockLabels),
            },
            settings,
        );

        Self {
            pipeline,
            evaluator,
            policy,
            audit,
            ledger,
            inventory,
            drafts,
            notifier,
        }
    }

    pub(crate) fn intake(&self, lines: Vec<LineItem>) -> Prescription {
        self.pipeline.intake(new_rx(lines), &technician()).unwrap()
    }

    pub(crate) fn at_verify(&self, lines: Vec<LineItem>) -> Prescription {
        let rx = self.intake(lines);
        self.pipeline.advance(&rx.id, rx.version, &technician()).unwrap()
    }

    pub(crate) fn at_check(&self, lines: Vec<LineItem>) -> Prescription {
        let rx = self.at_verify(lines);
        let rx = self.pipeline.accept(&rx.id, rx.version, &pharmacist()).unwrap();
        let rx = self.pipeline.advance(&rx.id, rx.version, &technician()).unwrap();
        self.pipeline.advance(&rx.id, rx.version, &technician()).unwrap()
    }
}
