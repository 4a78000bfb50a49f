//! Trait seams between the pipeline and everything it does not own.
//!
//! Trusted, in-workspace components:
//!
//! - `ClinicalEvaluator`: pure flag computation (rxflow-clinical)
//! - `PolicyEngine`: role gate evaluated before any action (rxflow-policy)
//! - `AuditWriter`: append-only transition log (rxflow-audit)
//! - `OverrideLedger`: append-only override records (rxflow-audit)
//! - `PrescriptionStore`: versioned record storage (`store` module)
//!
//! External collaborators, implemented by the hosting application:
//!
//! - `PatientDirectory`, `Inventory`, `SaleDrafts`, `Notifier`,
//!   `IdentityService`, `LabelPrinter`
//!
//! Every trait is `Send + Sync` so one `Pipeline` can serve concurrent actors.

use chrono::{DateTime, Utc};

use rxflow_contracts::{
    actor::Role,
    audit::TransitionRecord,
    clinical::{ClinicalFlagSet, PatientProfile},
    dispense::{Batch, LabelArtifact, Notification, SaleDraftRequest},
    error::RxResult,
    ids::{ActorId, BatchId, DrugId, PatientId, PrescriptionId, SaleDraftId},
    overrides::{OverrideRecord, OverrideRequest, OverrideToken},
    policy::{PolicyContext, PolicyVerdict},
    prescription::{Prescription, StockAllocation},
};

// ── Trusted components ────────────────────────────────────────────────────────

/// Computes clinical flags for a prescription.
///
/// Implementations must be deterministic and side-effect-free: the same
/// prescription lines and patient profile always produce the same flags.
pub trait ClinicalEvaluator: Send + Sync {
    fn evaluate(&self, prescription: &Prescription, patient: &PatientProfile) -> ClinicalFlagSet;
}

/// The role gate consulted before every pipeline action.
///
/// Implementations must be deterministic and fast; avoid I/O here.
pub trait PolicyEngine: Send + Sync {
    fn evaluate(&self, ctx: &PolicyContext) -> RxResult<PolicyVerdict>;
}

/// Append-only sink for transition records.
///
/// A failed write surfaces as `RxError::AuditWriteFailed`.
pub trait AuditWriter: Send + Sync {
    fn write(&self, record: &TransitionRecord) -> RxResult<()>;
}

/// Append-only record of every clinical flag override.
pub trait OverrideLedger: Send + Sync {
    /// Validate and append one override.
    ///
    /// Fails with `RxError::Validation` when the rationale is blank or the PIN
    /// was not verified. On success returns the token the state machine uses
    /// to clear exactly one line.
    fn record_override(&self, request: OverrideRequest) -> RxResult<OverrideToken>;

    /// All records for one prescription, in append order.
    fn records_for(&self, prescription_id: &PrescriptionId) -> RxResult<Vec<OverrideRecord>>;
}

/// Versioned storage for prescription records.
///
/// The optimistic version check lives here: `compare_and_swap` only writes
/// when the stored version still equals `expected_version`.
pub trait PrescriptionStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the id already exists.
    fn insert(&self, prescription: Prescription) -> RxResult<()>;

    fn get(&self, id: &PrescriptionId) -> RxResult<Prescription>;

    /// Replace the record if its stored version equals `expected_version`.
    ///
    /// The replacement's `version` must be `expected_version + 1`. Fails with
    /// `Conflict` on a stale version and `NotFound` for an unknown id.
    fn compare_and_swap(&self, expected_version: u64, next: Prescription) -> RxResult<()>;

    /// Snapshot of every record.
    fn all(&self) -> RxResult<Vec<Prescription>>;
}

// ── External collaborators ────────────────────────────────────────────────────

/// Read-only patient reference data.
pub trait PatientDirectory: Send + Sync {
    fn profile(&self, patient_id: &PatientId) -> RxResult<PatientProfile>;
}

/// The inventory/batch ledger. The pipeline never touches stock counters
/// directly; it only issues these requests.
pub trait Inventory: Send + Sync {
    /// Batches for `drug_id` in first-expired-first-out order.
    fn batch_lookup(&self, drug_id: &DrugId) -> RxResult<Vec<Batch>>;

    fn reserve(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()>;

    /// Undo a reservation that will not be dispensed.
    fn release_reservation(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()>;

    /// Deduct reserved stock for every allocation. All-or-nothing: on `Err`
    /// no allocation may have been deducted.
    fn deduct(&self, allocations: &[StockAllocation]) -> RxResult<()>;

    /// Compensate a completed `deduct` whose release was aborted.
    fn restock(&self, allocations: &[StockAllocation]) -> RxResult<()>;
}

/// The point-of-sale draft service.
pub trait SaleDrafts: Send + Sync {
    fn create(&self, request: &SaleDraftRequest) -> RxResult<SaleDraftId>;

    /// Compensate a draft whose release was aborted.
    fn cancel(&self, draft_id: &SaleDraftId) -> RxResult<()>;
}

/// SMS/WhatsApp notifications. Always fire-and-forget from the pipeline's
/// point of view: an `Err` is logged, never propagated.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> RxResult<()>;
}

/// Authentication and role lookup.
pub trait IdentityService: Send + Sync {
    /// `None` when the actor is not authenticated.
    fn role_of(&self, actor_id: &ActorId) -> Option<Role>;

    /// Check an override PIN for `actor_id`.
    fn verify_pin(&self, actor_id: &ActorId, pin: &str) -> bool;
}

/// Produces the dispensing label at LABEL.
pub trait LabelPrinter: Send + Sync {
    fn generate(&self, prescription: &Prescription, at: DateTime<Utc>) -> RxResult<LabelArtifact>;
}

// ── Shared handles ────────────────────────────────────────────────────────────
//
// Lets a host keep an `Arc` to a component after handing a `Box` of it to the
// pipeline, e.g. to inspect an audit log or a mock collaborator's call counts.

macro_rules! forward_arc {
    ($trait:ident { $(fn $name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)* }) => {
        impl<T: $trait + ?Sized> $trait for std::sync::Arc<T> {
            $(fn $name(&self $(, $arg: $ty)*) -> $ret {
                (**self).$name($($arg),*)
            })*
        }
    };
}

forward_arc!(ClinicalEvaluator {
    fn evaluate(&self, prescription: &Prescription, patient: &PatientProfile) -> ClinicalFlagSet;
});
forward_arc!(PolicyEngine {
    fn evaluate(&self, ctx: &PolicyContext) -> RxResult<PolicyVerdict>;
});
forward_arc!(AuditWriter {
    fn write(&self, record: &TransitionRecord) -> RxResult<()>;
});
forward_arc!(OverrideLedger {
    fn record_override(&self, request: OverrideRequest) -> RxResult<OverrideToken>;
    fn records_for(&self, prescription_id: &PrescriptionId) -> RxResult<Vec<OverrideRecord>>;
});
forward_arc!(PrescriptionStore {
    fn insert(&self, prescription: Prescription) -> RxResult<()>;
    fn get(&self, id: &PrescriptionId) -> RxResult<Prescription>;
    fn compare_and_swap(&self, expected_version: u64, next: Prescription) -> RxResult<()>;
    fn all(&self) -> RxResult<Vec<Prescription>>;
});
forward_arc!(PatientDirectory {
    fn profile(&self, patient_id: &PatientId) -> RxResult<PatientProfile>;
});
forward_arc!(Inventory {
    fn batch_lookup(&self, drug_id: &DrugId) -> RxResult<Vec<Batch>>;
    fn reserve(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()>;
    fn release_reservation(&self, batch_id: &BatchId, quantity: u32) -> RxResult<()>;
    fn deduct(&self, allocations: &[StockAllocation]) -> RxResult<()>;
    fn restock(&self, allocations: &[StockAllocation]) -> RxResult<()>;
});
forward_arc!(SaleDrafts {
    fn create(&self, request: &SaleDraftRequest) -> RxResult<SaleDraftId>;
    fn cancel(&self, draft_id: &SaleDraftId) -> RxResult<()>;
});
forward_arc!(Notifier {
    fn send(&self, notification: &Notification) -> RxResult<()>;
});
forward_arc!(IdentityService {
    fn role_of(&self, actor_id: &ActorId) -> Option<Role>;
    fn verify_pin(&self, actor_id: &ActorId, pin: &str) -> bool;
});
forward_arc!(LabelPrinter {
    fn generate(&self, prescription: &Prescription, at: DateTime<Utc>) -> RxResult<LabelArtifact>;
});
