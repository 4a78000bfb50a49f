//! The clinical reference table: drugs, interacting pairs, and dose ranges.
//!
//! Loaded from TOML:
//!
//! ```toml
//! [[drugs]]
//! id = "amoxicillin-500"
//! name = "Amoxicillin 500 mg capsule"
//! ingredients = ["amoxicillin"]
//! classes = ["penicillin"]
//!
//! [[interactions]]
//! a = "warfarin"
//! b = "aspirin"
//! severity = "major"
//! mechanism = "additive bleeding risk"
//!
//! [[dose_ranges]]
//! drug = "amoxicillin-500"
//! band = "adult"
//! min_mg = 250
//! max_mg = 1000
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use rxflow_contracts::error::{RxError, RxResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DrugEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    /// Drug classes (e.g. "penicillin", "nsaid"), matched against allergies.
    #[serde(default)]
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Major,
    Moderate,
    Minor,
}

/// A known interacting pair, by ingredient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractionEntry {
    pub a: String,
    pub b: String,
    pub severity: Severity,
    #[serde(default)]
    pub mechanism: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeBand {
    Pediatric,
    Adult,
    Geriatric,
}

impl AgeBand {
    /// Pediatric under 12, adult under 65, geriatric otherwise. Unknown age
    /// is treated as adult.
    pub fn for_age(age_years: Option<u32>) -> Self {
        match age_years {
            Some(age) if age < 12 => AgeBand::Pediatric,
            Some(age) if age >= 65 => AgeBand::Geriatric,
            _ => AgeBand::Adult,
        }
    }
}

/// Single-dose limits for one drug in one age band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DoseRange {
    pub drug: String,
    pub band: AgeBand,
    pub min_mg: f64,
    pub max_mg: f64,
    /// Ceiling applied when the patient's weight is known.
    pub max_mg_per_kg: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClinicalReference {
    #[serde(default)]
    pub drugs: Vec<DrugEntry>,
    #[serde(default)]
    pub interactions: Vec<InteractionEntry>,
    #[serde(default)]
    pub dose_ranges: Vec<DoseRange>,
}

impl ClinicalReference {
    pub fn from_toml_str(s: &str) -> RxResult<Self> {
        let reference: ClinicalReference = toml::from_str(s).map_err(|e| RxError::Config {
            reason: format!("failed to parse clinical reference TOML: {}", e),
        })?;
        reference.validate()?;
        Ok(reference)
    }

    pub fn from_file(path: &Path) -> RxResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RxError::Config {
            reason: format!(
                "failed to read clinical reference '{}': {}",
                path.display(),
                e
            ),
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> RxResult<()> {
        let mut ids = BTreeSet::new();
        for drug in &self.drugs {
            if !ids.insert(drug.id.as_str()) {
                return Err(RxError::Config {
                    reason: format!("drug '{}' is listed twice", drug.id),
                });
            }
        }

        let mut bands = BTreeSet::new();
        for range in &self.dose_ranges {
            if !ids.contains(range.drug.as_str()) {
                return Err(RxError::Config {
                    reason: format!("dose range names unknown drug '{}'", range.drug),
                });
            }
            if !(range.min_mg >= 0.0 && range.min_mg <= range.max_mg) {
                return Err(RxError::Config {
                    reason: format!(
                        "dose range for '{}' ({:?}) must satisfy 0 <= min_mg <= max_mg",
                        range.drug, range.band
                    ),
                });
            }
            if !bands.insert((range.drug.as_str(), range.band)) {
                return Err(RxError::Config {
                    reason: format!(
                        "dose range for '{}' ({:?}) is listed twice",
                        range.drug, range.band
                    ),
                });
            }
        }
        Ok(())
    }

    /// Lowercased lookup keys derived from the table.
    pub(crate) fn index(&self) -> ReferenceIndex<'_> {
        ReferenceIndex {
            drugs: self.drugs.iter().map(|d| (d.id.as_str(), d)).collect(),
            reference: self,
        }
    }
}

pub(crate) struct ReferenceIndex<'r> {
    drugs: HashMap<&'r str, &'r DrugEntry>,
    reference: &'r ClinicalReference,
}

impl<'r> ReferenceIndex<'r> {
    /// Ingredient keys for a drug: its listed ingredients, or its id when the
    /// drug is unknown or lists none.
    pub(crate) fn ingredients(&self, drug_id: &str) -> BTreeSet<String> {
        match self.drugs.get(drug_id) {
            Some(drug) if !drug.ingredients.is_empty() => {
                drug.ingredients.iter().map(|i| i.to_lowercase()).collect()
            }
            _ => BTreeSet::from([drug_id.to_lowercase()]),
        }
    }

    /// Every term an allergy entry may name for this drug.
    pub(crate) fn allergy_terms(&self, drug_id: &str) -> BTreeSet<String> {
        let mut terms = self.ingredients(drug_id);
        terms.insert(drug_id.to_lowercase());
        if let Some(drug) = self.drugs.get(drug_id) {
            terms.insert(drug.name.to_lowercase());
            terms.extend(drug.classes.iter().map(|c| c.to_lowercase()));
        }
        terms
    }

    /// The first listed interaction between the two ingredient sets.
    pub(crate) fn interaction(
        &self,
        left: &BTreeSet<String>,
        right: &BTreeSet<String>,
    ) -> Option<&'r InteractionEntry> {
        self.reference.interactions.iter().find(|pair| {
            let a = pair.a.to_lowercase();
            let b = pair.b.to_lowercase();
            (left.contains(&a) && right.contains(&b)) || (left.contains(&b) && right.contains(&a))
        })
    }

    pub(crate) fn dose_range(&self, drug_id: &str, band: AgeBand) -> Option<&'r DoseRange> {
        self.reference
            .dose_ranges
            .iter()
            .find(|r| r.drug == drug_id && r.band == band)
    }
}
