//! Simulated pharmacy data for the rxflow reference runtime.
//!
//! All data in this module is hardcoded and fictional. No external systems are
//! contacted. The staff roster, patient directory, and stock ledger stand in
//! for the hosting application's real services.

use chrono::NaiveDate;

use rxflow_contracts::{
    actor::Role,
    clinical::PatientProfile,
    dispense::Batch,
    ids::{ActorId, BatchId, ClinicianId, DrugId, LineId, PatientId},
    prescription::{LineItem, NewPrescription, Priority},
};

// ── Staff ─────────────────────────────────────────────────────────────────────

pub const PHARMACIST: &str = "ph-rivera";
pub const SECOND_PHARMACIST: &str = "ph-chen";
pub const TECHNICIAN: &str = "tech-okafor";
pub const CASHIER: &str = "cash-lindqvist";
pub const ADMIN: &str = "admin-park";

/// One staff login known to the identity service.
#[derive(Debug, Clone)]
pub struct StaffMember {
    pub actor_id: ActorId,
    pub role: Role,
    /// Override PIN. Only meaningful for pharmacists and admins.
    pub pin: String,
}

pub fn staff() -> Vec<StaffMember> {
    let member = |id: &str, role: Role, pin: &str| StaffMember {
        actor_id: ActorId::new(id),
        role,
        pin: pin.to_string(),
    };
    vec![
        member(PHARMACIST, Role::Pharmacist, "4821"),
        member(SECOND_PHARMACIST, Role::Pharmacist, "7305"),
        member(TECHNICIAN, Role::Technician, "1111"),
        member(CASHIER, Role::Cashier, "2222"),
        member(ADMIN, Role::Admin, "9090"),
    ]
}

/// The override PIN on file for `actor_id`, if any.
pub fn pin_for(actor_id: &str) -> Option<String> {
    staff()
        .into_iter()
        .find(|m| m.actor_id.as_str() == actor_id)
        .map(|m| m.pin)
}

// ── Patients ──────────────────────────────────────────────────────────────────

/// Adult with a penicillin allergy who takes warfarin.
pub const PATIENT_ALLERGIC: &str = "pat-1001";
/// Healthy adult, no allergies, no current medication.
pub const PATIENT_CLEAR: &str = "pat-1002";
/// Seven-year-old, 22 kg.
pub const PATIENT_CHILD: &str = "pat-1003";
/// Seventy-eight-year-old on metformin.
pub const PATIENT_SENIOR: &str = "pat-1004";

pub fn patients() -> Vec<PatientProfile> {
    vec![
        PatientProfile {
            patient_id: PatientId::new(PATIENT_ALLERGIC),
            display_name: "M. Adeyemi".to_string(),
            allergies: vec!["Penicillin".to_string()],
            current_medications: vec![DrugId::new("warf-5")],
            age_years: Some(58),
            weight_kg: Some(81.0),
            phone: Some("+15550101001".to_string()),
        },
        PatientProfile {
            patient_id: PatientId::new(PATIENT_CLEAR),
            display_name: "J. Moreau".to_string(),
            age_years: Some(34),
            weight_kg: Some(70.0),
            phone: Some("+15550101002".to_string()),
            ..Default::default()
        },
        PatientProfile {
            patient_id: PatientId::new(PATIENT_CHILD),
            display_name: "A. Novak".to_string(),
            age_years: Some(7),
            weight_kg: Some(22.0),
            phone: Some("+15550101003".to_string()),
            ..Default::default()
        },
        PatientProfile {
            patient_id: PatientId::new(PATIENT_SENIOR),
            display_name: "E. Sato".to_string(),
            current_medications: vec![DrugId::new("metf-500")],
            age_years: Some(78),
            weight_kg: Some(63.0),
            phone: None,
            ..Default::default()
        },
    ]
}

// ── Stock ─────────────────────────────────────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MAX)
}

fn batch(id: &str, drug: &str, number: &str, expiry: NaiveDate, qty: u32, mrp: u64) -> Batch {
    Batch {
        id: BatchId::new(id),
        drug_id: DrugId::new(drug),
        batch_number: number.to_string(),
        expiry,
        available: qty,
        unit_mrp_minor: mrp,
    }
}

/// Opening stock. Amoxicillin has a short-dated batch so FEFO selection is
/// visible; one paracetamol batch is already expired.
pub fn opening_stock() -> Vec<Batch> {
    vec![
        batch("amox-b1", "amox-500", "AMX-2711", date(2027, 11, 30), 12, 450),
        batch("amox-b2", "amox-500", "AMX-2805", date(2028, 5, 31), 200, 450),
        batch("para-b0", "para-500", "PCM-2501", date(2025, 1, 31), 500, 120),
        batch("para-b1", "para-500", "PCM-2809", date(2028, 9, 30), 300, 120),
        batch("ibu-b1", "ibu-400", "IBU-2803", date(2028, 3, 31), 150, 180),
        batch("asp-b1", "asp-75", "ASP-2812", date(2028, 12, 31), 400, 60),
        batch("warf-b1", "warf-5", "WRF-2802", date(2028, 2, 29), 90, 310),
        batch("metf-b1", "metf-500", "MET-2806", date(2028, 6, 30), 500, 95),
    ]
}

// ── Prescriptions ─────────────────────────────────────────────────────────────

pub fn line(id: &str, drug: &str, dose: &str, days: u32, per_day: u32) -> LineItem {
    LineItem {
        id: LineId::new(id),
        drug_id: DrugId::new(drug),
        dose: dose.to_string(),
        frequency: format!("{} times daily", per_day),
        route: "oral".to_string(),
        duration_days: Some(days),
        quantity: days * per_day,
        instructions: "take with water".to_string(),
    }
}

pub fn prescription(patient: &str, priority: Priority, lines: Vec<LineItem>) -> NewPrescription {
    NewPrescription {
        patient_id: PatientId::new(patient),
        clinician_id: ClinicianId::new("dr-haddad"),
        lines,
        priority,
    }
}

/// A warfarin delivery used to clear a stock hold.
pub fn warfarin_delivery() -> Batch {
    batch("warf-b2", "warf-5", "WRF-2907", date(2029, 7, 31), 200, 310)
}
