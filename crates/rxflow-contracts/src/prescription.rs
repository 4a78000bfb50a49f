//! Prescription records and the pipeline stage set.
//!
//! A `Prescription` is the single authoritative record per id. It is created
//! at intake and afterwards mutated only by the pipeline state machine, which
//! bumps `version` on every write.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clinical::ClinicalFlagSet,
    ids::{BatchId, ClinicianId, DispenseEventId, DrugId, LabelId, LineId, PatientId, PrescriptionId},
};

/// The pipeline phase a prescription currently occupies.
///
/// Declaration order is pipeline order, which is also the `Ord` used by the
/// queue projector. `OnHold` sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Intake,
    Verify,
    Fill,
    Label,
    Check,
    Released,
    Complete,
    OnHold,
}

impl Stage {
    /// Every defined stage, in pipeline order.
    pub const ALL: [Stage; 8] = [
        Stage::Intake,
        Stage::Verify,
        Stage::Fill,
        Stage::Label,
        Stage::Check,
        Stage::Released,
        Stage::Complete,
        Stage::OnHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "INTAKE",
            Stage::Verify => "VERIFY",
            Stage::Fill => "FILL",
            Stage::Label => "LABEL",
            Stage::Check => "CHECK",
            Stage::Released => "RELEASED",
            Stage::Complete => "COMPLETE",
            Stage::OnHold => "ON_HOLD",
        }
    }

    /// Stages a hold may be raised from.
    pub fn is_holdable(&self) -> bool {
        matches!(
            self,
            Stage::Intake | Stage::Verify | Stage::Fill | Stage::Label | Stage::Check
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
}

/// One medication line on a prescription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineId,
    pub drug_id: DrugId,
    /// Free text with a leading numeric amount and unit, e.g. "500 mg".
    pub dose: String,
    pub frequency: String,
    pub route: String,
    /// Days supply. `None` when the prescriber left it open.
    pub duration_days: Option<u32>,
    pub quantity: u32,
    pub instructions: String,
}

/// Intake payload handed over by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrescription {
    pub patient_id: PatientId,
    pub clinician_id: ClinicianId,
    pub lines: Vec<LineItem>,
    #[serde(default)]
    pub priority: Priority,
}

/// Stock reserved for one line at FILL, consumed at release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAllocation {
    pub line_id: LineId,
    pub drug_id: DrugId,
    pub batch_id: BatchId,
    pub quantity: u32,
    /// Maximum retail price per unit, in minor currency units.
    pub unit_mrp_minor: u64,
}

/// The authoritative prescription record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: PrescriptionId,
    pub patient_id: PatientId,
    pub clinician_id: ClinicianId,
    pub lines: Vec<LineItem>,
    pub stage: Stage,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Bumped by exactly one on every stored write.
    pub version: u64,
    /// Display cache of the last evaluation. Never a source of truth.
    pub flags: ClinicalFlagSet,
    /// Lines whose flags were cleared by a recorded override.
    pub overridden_lines: BTreeSet<LineId>,
    /// Populated on FILL → LABEL.
    pub allocations: Vec<StockAllocation>,
    /// Populated on LABEL → CHECK.
    pub label_id: Option<LabelId>,
    /// Populated on release.
    pub dispense_event_id: Option<DispenseEventId>,
    /// Set while a release is in flight at CHECK. Cleared on commit or abort.
    #[serde(default)]
    pub release_claim: Option<DispenseEventId>,
    pub next_refill_due: Option<DateTime<Utc>>,
}

impl Prescription {
    /// Build a fresh INTAKE record at version 0.
    pub fn from_intake(id: PrescriptionId, new: NewPrescription, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            patient_id: new.patient_id,
            clinician_id: new.clinician_id,
            lines: new.lines,
            stage: Stage::Intake,
            priority: new.priority,
            created_at,
            version: 0,
            flags: ClinicalFlagSet::default(),
            overridden_lines: BTreeSet::new(),
            allocations: Vec::new(),
            label_id: None,
            dispense_event_id: None,
            release_claim: None,
            next_refill_due: None,
        }
    }

    pub fn line(&self, line_id: &LineId) -> Option<&LineItem> {
        self.lines.iter().find(|l| &l.id == line_id)
    }

    pub fn is_urgent(&self) -> bool {
        self.priority == Priority::Urgent
    }

    /// Copy of `self` moved to `stage` with the version bumped.
    ///
    /// Every transition builds its successor record through this so no write
    /// path can forget the version bump.
    pub fn advanced_to(&self, stage: Stage) -> Self {
        Self {
            stage,
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Copy of `self` stamped with `version`, for restoring earlier contents
    /// over a newer write without moving the version backwards.
    pub fn restamped(&self, version: u64) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }
}
