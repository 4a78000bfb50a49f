//! Reference-table clinical safety evaluator.
//!
//! `ReferenceEvaluator` implements the `ClinicalEvaluator` trait from
//! `rxflow-core`.  Evaluation runs three independent checks per line and
//! collects every flag before returning, so a pharmacist sees the full
//! picture in one pass:
//!
//! 1. **Allergy**: the drug's id, name, ingredients, or classes appear in the
//!    patient's allergy list (case-insensitive).
//! 2. **Interaction**: the drug interacts, by ingredient, with another line
//!    on the prescription or with one of the patient's current medications.
//!    Both interacting lines are flagged.
//! 3. **Dose range**: the parsed dose falls outside the range configured for
//!    the patient's age band, or above the per-kg ceiling.  A dose that
//!    cannot be parsed for a drug with a configured range is flagged.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, warn};

use rxflow_contracts::{
    clinical::{ClinicalFlagSet, PatientProfile},
    error::RxResult,
    prescription::{LineItem, Prescription},
};
use rxflow_core::traits::ClinicalEvaluator;

use crate::{
    dose::parse_dose_mg,
    reference::{AgeBand, ClinicalReference, ReferenceIndex},
};

pub struct ReferenceEvaluator {
    reference: ClinicalReference,
}

impl ReferenceEvaluator {
    pub fn new(reference: ClinicalReference) -> Self {
        Self { reference }
    }

    pub fn from_toml_str(s: &str) -> RxResult<Self> {
        ClinicalReference::from_toml_str(s).map(Self::new)
    }

    pub fn from_file(path: &Path) -> RxResult<Self> {
        ClinicalReference::from_file(path).map(Self::new)
    }

    pub fn reference(&self) -> &ClinicalReference {
        &self.reference
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn dose_out_of_range(
        index: &ReferenceIndex<'_>,
        line: &LineItem,
        band: AgeBand,
        weight_kg: Option<f64>,
    ) -> bool {
        let Some(range) = index.dose_range(line.drug_id.as_str(), band) else {
            return false;
        };

        let Some(mg) = parse_dose_mg(&line.dose) else {
            warn!(line_id = %line.id, dose = %line.dose, "dose could not be parsed");
            return true;
        };

        if mg < range.min_mg || mg > range.max_mg {
            debug!(
                line_id = %line.id,
                dose_mg = mg,
                min_mg = range.min_mg,
                max_mg = range.max_mg,
                band = ?band,
                "dose outside configured range"
            );
            return true;
        }

        match (range.max_mg_per_kg, weight_kg) {
            (Some(per_kg), Some(kg)) if kg > 0.0 && mg > per_kg * kg => {
                debug!(
                    line_id = %line.id,
                    dose_mg = mg,
                    ceiling_mg = per_kg * kg,
                    "dose above per-kg ceiling"
                );
                true
            }
            _ => false,
        }
    }
}

impl ClinicalEvaluator for ReferenceEvaluator {
    fn evaluate(&self, prescription: &Prescription, patient: &PatientProfile) -> ClinicalFlagSet {
        let index = self.reference.index();
        let mut flags = ClinicalFlagSet::default();

        let allergies: BTreeSet<String> = patient
            .allergies
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        let band = AgeBand::for_age(patient.age_years);

        let ingredients: Vec<BTreeSet<String>> = prescription
            .lines
            .iter()
            .map(|l| index.ingredients(l.drug_id.as_str()))
            .collect();
        let current_meds: Vec<BTreeSet<String>> = patient
            .current_medications
            .iter()
            .map(|d| index.ingredients(d.as_str()))
            .collect();

        for (i, line) in prescription.lines.iter().enumerate() {
            // ── Allergy ───────────────────────────────────────────────────────
            let terms = index.allergy_terms(line.drug_id.as_str());
            if let Some(hit) = terms.iter().find(|t| allergies.contains(*t)) {
                debug!(line_id = %line.id, allergen = %hit, "allergy match");
                flags.allergy_matches.insert(line.id.clone());
            }

            // ── Interactions ──────────────────────────────────────────────────
            for (j, other) in prescription.lines.iter().enumerate().skip(i + 1) {
                if let Some(pair) = index.interaction(&ingredients[i], &ingredients[j]) {
                    debug!(
                        line_id = %line.id,
                        other_line_id = %other.id,
                        severity = ?pair.severity,
                        "interaction between lines"
                    );
                    flags.interactions.insert(line.id.clone());
                    flags.interactions.insert(other.id.clone());
                }
            }
            for (med, med_ingredients) in patient.current_medications.iter().zip(&current_meds) {
                if let Some(pair) = index.interaction(&ingredients[i], med_ingredients) {
                    debug!(
                        line_id = %line.id,
                        current_medication = %med,
                        severity = ?pair.severity,
                        "interaction with current medication"
                    );
                    flags.interactions.insert(line.id.clone());
                }
            }

            // ── Dose range ────────────────────────────────────────────────────
            if Self::dose_out_of_range(&index, line, band, patient.weight_kg) {
                flags.dose_out_of_range.insert(line.id.clone());
            }
        }

        if !flags.is_clear() {
            warn!(
                prescription_id = %prescription.id,
                allergy = flags.allergy_matches.len(),
                interaction = flags.interactions.len(),
                dose = flags.dose_out_of_range.len(),
                "clinical flags raised"
            );
        }
        flags
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use rxflow_contracts::{
        clinical::PatientProfile,
        ids::{ClinicianId, DrugId, LineId, PatientId, PrescriptionId},
        prescription::{LineItem, NewPrescription, Prescription, Priority},
    };
    use rxflow_core::traits::ClinicalEvaluator;

    use super::ReferenceEvaluator;

    const REFERENCE: &str = r#"
        [[drugs]]
        id = "amox-500"
        name = "Amoxicillin 500 mg capsule"
        ingredients = ["amoxicillin"]
        classes = ["penicillin"]

        [[drugs]]
        id = "warf-5"
        name = "Warfarin 5 mg tablet"
        ingredients = ["warfarin"]

        [[drugs]]
        id = "asp-75"
        name = "Aspirin 75 mg tablet"
        ingredients = ["aspirin"]
        classes = ["nsaid"]

        [[drugs]]
        id = "para-500"
        name = "Paracetamol 500 mg tablet"
        ingredients = ["paracetamol"]

        [[interactions]]
        a = "warfarin"
        b = "aspirin"
        severity = "major"
        mechanism = "additive bleeding risk"

        [[dose_ranges]]
        drug = "para-500"
        band = "adult"
        min_mg = 325
        max_mg = 1000

        [[dose_ranges]]
        drug = "para-500"
        band = "pediatric"
        min_mg = 60
        max_mg = 500
        max_mg_per_kg = 15
    "#;

    // ── Builder helpers ───────────────────────────────────────────────────────

    fn evaluator() -> ReferenceEvaluator {
        ReferenceEvaluator::from_toml_str(REFERENCE).unwrap()
    }

    fn line(id: &str, drug: &str, dose: &str) -> LineItem {
        LineItem {
            id: LineId::new(id),
            drug_id: DrugId::new(drug),
            dose: dose.to_string(),
            frequency: "once daily".to_string(),
            route: "oral".to_string(),
            duration_days: Some(7),
            quantity: 7,
            instructions: String::new(),
        }
    }

    fn rx(lines: Vec<LineItem>) -> Prescription {
        Prescription::from_intake(
            PrescriptionId::new(),
            NewPrescription {
                patient_id: PatientId::new("pat-1"),
                clinician_id: ClinicianId::new("dr-1"),
                lines,
                priority: Priority::Normal,
            },
            Utc::now(),
        )
    }

    fn patient() -> PatientProfile {
        PatientProfile {
            patient_id: PatientId::new("pat-1"),
            display_name: "Test Patient".to_string(),
            age_years: Some(40),
            ..Default::default()
        }
    }

    // ── Allergy ───────────────────────────────────────────────────────────────

    #[test]
    fn test_allergy_matches_class_case_insensitively() {
        let mut p = patient();
        p.allergies = vec!["Penicillin".to_string()];

        let flags = evaluator().evaluate(&rx(vec![line("l1", "amox-500", "500 mg")]), &p);
        assert!(flags.allergy_matches.contains(&LineId::new("l1")));
        assert!(flags.interactions.is_empty());
    }

    #[test]
    fn test_allergy_matches_ingredient_and_id() {
        let mut p = patient();
        p.allergies = vec!["amoxicillin".to_string(), "ASP-75".to_string()];

        let flags = evaluator().evaluate(
            &rx(vec![line("l1", "amox-500", "500 mg"), line("l2", "asp-75", "75 mg")]),
            &p,
        );
        assert_eq!(flags.allergy_matches.len(), 2);
    }

    #[test]
    fn test_clear_prescription_has_no_flags() {
        let flags = evaluator().evaluate(&rx(vec![line("l1", "para-500", "500 mg")]), &patient());
        assert!(flags.is_clear(), "unexpected flags: {:?}", flags);
    }

    // ── Interaction ───────────────────────────────────────────────────────────

    #[test]
    fn test_interacting_lines_are_both_flagged() {
        let flags = evaluator().evaluate(
            &rx(vec![
                line("l1", "warf-5", "5 mg"),
                line("l2", "para-500", "500 mg"),
                line("l3", "asp-75", "75 mg"),
            ]),
            &patient(),
        );
        assert!(flags.interactions.contains(&LineId::new("l1")));
        assert!(flags.interactions.contains(&LineId::new("l3")));
        assert!(!flags.interactions.contains(&LineId::new("l2")));
    }

    #[test]
    fn test_interaction_with_current_medication() {
        let mut p = patient();
        p.current_medications = vec![DrugId::new("warf-5")];

        let flags = evaluator().evaluate(&rx(vec![line("l1", "asp-75", "75 mg")]), &p);
        assert!(flags.interactions.contains(&LineId::new("l1")));
    }

    // ── Dose range ────────────────────────────────────────────────────────────

    #[test]
    fn test_dose_above_adult_range() {
        let flags = evaluator().evaluate(&rx(vec![line("l1", "para-500", "2 g")]), &patient());
        assert!(flags.dose_out_of_range.contains(&LineId::new("l1")));
        assert!(flags.blocking_lines().is_empty(), "dose flags are advisory only");
    }

    #[test]
    fn test_pediatric_band_and_weight_ceiling() {
        let mut child = patient();
        child.age_years = Some(6);
        child.weight_kg = Some(20.0);

        // 400 mg is inside the pediatric range but above 15 mg/kg * 20 kg.
        let flags = evaluator().evaluate(&rx(vec![line("l1", "para-500", "400 mg")]), &child);
        assert!(flags.dose_out_of_range.contains(&LineId::new("l1")));

        let flags = evaluator().evaluate(&rx(vec![line("l1", "para-500", "250 mg")]), &child);
        assert!(flags.dose_out_of_range.is_empty());
    }

    #[test]
    fn test_unparseable_dose_is_flagged() {
        let flags =
            evaluator().evaluate(&rx(vec![line("l1", "para-500", "one tablet")]), &patient());
        assert!(flags.dose_out_of_range.contains(&LineId::new("l1")));
    }

    #[test]
    fn test_drug_without_range_is_not_dose_checked() {
        let flags =
            evaluator().evaluate(&rx(vec![line("l1", "amox-500", "one capsule")]), &patient());
        assert!(flags.dose_out_of_range.is_empty());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let prescription = rx(vec![line("l1", "warf-5", "5 mg"), line("l2", "asp-75", "75 mg")]);
        let e = evaluator();
        assert_eq!(
            e.evaluate(&prescription, &patient()),
            e.evaluate(&prescription, &patient())
        );
    }
}
