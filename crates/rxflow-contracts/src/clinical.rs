//! Clinical safety inputs and derived flags.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{DrugId, LineId, PatientId};

/// Read-only patient data supplied by the patient directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientProfile {
    pub patient_id: PatientId,
    pub display_name: String,
    /// Recorded allergies: drug ids, ingredient names, or drug classes.
    pub allergies: Vec<String>,
    /// Medications the patient is currently taking outside this prescription.
    pub current_medications: Vec<DrugId>,
    pub age_years: Option<u32>,
    pub weight_kg: Option<f64>,
    pub phone: Option<String>,
}

/// Per-line clinical flags for one prescription.
///
/// Derived by the clinical safety evaluator. Cached on the prescription for
/// display; the pipeline recomputes it before every accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalFlagSet {
    pub allergy_matches: BTreeSet<LineId>,
    pub interactions: BTreeSet<LineId>,
    pub dose_out_of_range: BTreeSet<LineId>,
}

impl ClinicalFlagSet {
    /// Lines carrying a hard block (allergy match or interaction).
    pub fn blocking_lines(&self) -> BTreeSet<LineId> {
        self.allergy_matches
            .union(&self.interactions)
            .cloned()
            .collect()
    }

    pub fn is_clear(&self) -> bool {
        self.allergy_matches.is_empty()
            && self.interactions.is_empty()
            && self.dose_out_of_range.is_empty()
    }

    pub fn is_flagged(&self, line_id: &LineId) -> bool {
        self.allergy_matches.contains(line_id)
            || self.interactions.contains(line_id)
            || self.dose_out_of_range.contains(line_id)
    }

    /// Remove every flag on `line_id`.
    pub fn clear_line(&mut self, line_id: &LineId) {
        self.allergy_matches.remove(line_id);
        self.interactions.remove(line_id);
        self.dose_out_of_range.remove(line_id);
    }

    /// Copy of `self` with every line in `cleared` removed.
    pub fn without_lines<'a>(&self, cleared: impl IntoIterator<Item = &'a LineId>) -> Self {
        let mut out = self.clone();
        for line in cleared {
            out.clear_line(line);
        }
        out
    }
}
