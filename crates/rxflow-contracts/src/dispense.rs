//! Release-side records and collaborator payloads.
//!
//! `DispenseEvent` is what was actually handed out; it is created exactly once
//! per prescription, at release, and never modified. The `HandoffChecklist`
//! hangs off it and is the only mutable record after release.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    ActorId, BatchId, DispenseEventId, DrugId, LabelId, LineId, PatientId, PrescriptionId,
};

// ── Inventory ─────────────────────────────────────────────────────────────────

/// A stock batch as reported by the inventory collaborator's FEFO lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub drug_id: DrugId,
    pub batch_number: String,
    pub expiry: NaiveDate,
    /// Quantity available for new reservations.
    pub available: u32,
    pub unit_mrp_minor: u64,
}

impl Batch {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry < today
    }
}

// ── Dispense event ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensedLine {
    pub line_id: LineId,
    pub batch_id: BatchId,
    pub quantity_dispensed: u32,
}

/// Immutable record of a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenseEvent {
    pub id: DispenseEventId,
    pub prescription_id: PrescriptionId,
    pub lines: Vec<DispensedLine>,
    pub visual_check_confirmed: bool,
    pub released_by: ActorId,
    pub released_at: DateTime<Utc>,
}

// ── Handoff checklist ─────────────────────────────────────────────────────────

/// The six patient-facing handoff steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffField {
    IdentityVerified,
    CounselingProvided,
    PaymentCollected,
    MedicationHanded,
    Acknowledgment,
    SignatureObtained,
}

impl HandoffField {
    pub const ALL: [HandoffField; 6] = [
        HandoffField::IdentityVerified,
        HandoffField::CounselingProvided,
        HandoffField::PaymentCollected,
        HandoffField::MedicationHanded,
        HandoffField::Acknowledgment,
        HandoffField::SignatureObtained,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffField::IdentityVerified => "identity_verified",
            HandoffField::CounselingProvided => "counseling_provided",
            HandoffField::PaymentCollected => "payment_collected",
            HandoffField::MedicationHanded => "medication_handed",
            HandoffField::Acknowledgment => "acknowledgment",
            HandoffField::SignatureObtained => "signature_obtained",
        }
    }
}

impl fmt::Display for HandoffField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checklist per dispense event. Completion is derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffChecklist {
    pub dispense_event_id: DispenseEventId,
    pub identity_verified: bool,
    pub counseling_provided: bool,
    pub payment_collected: bool,
    pub medication_handed: bool,
    pub acknowledgment: bool,
    pub signature_obtained: bool,
}

impl HandoffChecklist {
    pub fn new(dispense_event_id: DispenseEventId) -> Self {
        Self {
            dispense_event_id,
            identity_verified: false,
            counseling_provided: false,
            payment_collected: false,
            medication_handed: false,
            acknowledgment: false,
            signature_obtained: false,
        }
    }

    pub fn get(&self, field: HandoffField) -> bool {
        match field {
            HandoffField::IdentityVerified => self.identity_verified,
            HandoffField::CounselingProvided => self.counseling_provided,
            HandoffField::PaymentCollected => self.payment_collected,
            HandoffField::MedicationHanded => self.medication_handed,
            HandoffField::Acknowledgment => self.acknowledgment,
            HandoffField::SignatureObtained => self.signature_obtained,
        }
    }

    pub fn set(&mut self, field: HandoffField, value: bool) {
        let slot = match field {
            HandoffField::IdentityVerified => &mut self.identity_verified,
            HandoffField::CounselingProvided => &mut self.counseling_provided,
            HandoffField::PaymentCollected => &mut self.payment_collected,
            HandoffField::MedicationHanded => &mut self.medication_handed,
            HandoffField::Acknowledgment => &mut self.acknowledgment,
            HandoffField::SignatureObtained => &mut self.signature_obtained,
        };
        *slot = value;
    }

    /// Fields still false, in checklist order.
    pub fn missing(&self) -> Vec<HandoffField> {
        HandoffField::ALL
            .into_iter()
            .filter(|f| !self.get(*f))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        HandoffField::ALL.iter().all(|f| self.get(*f))
    }

    /// Completed fields as a 0..=100 percentage.
    pub fn progress_percent(&self) -> u8 {
        let done = HandoffField::ALL.iter().filter(|f| self.get(**f)).count();
        (done * 100 / HandoffField::ALL.len()) as u8
    }
}

// ── Collaborator payloads ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDraftLine {
    pub drug_id: DrugId,
    pub batch_id: BatchId,
    pub quantity: u32,
    pub unit_mrp_minor: u64,
}

/// Emitted to the point-of-sale service on release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDraftRequest {
    pub dispense_event_id: DispenseEventId,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub lines: Vec<SaleDraftLine>,
    /// Sum of quantity × MRP. Tax and discounts are the POS's concern.
    pub subtotal_minor: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PrescriptionReady,
    HandoffComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub dispense_event_id: DispenseEventId,
}

/// Produced by the label printer at LABEL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelArtifact {
    pub id: LabelId,
    pub prescription_id: PrescriptionId,
    pub printed_at: DateTime<Utc>,
}
