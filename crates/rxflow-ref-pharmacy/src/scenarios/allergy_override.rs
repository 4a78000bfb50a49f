//! Scenario 1: Allergy and Interaction Override
//!
//! A penicillin-allergic patient on warfarin is prescribed amoxicillin,
//! low-dose aspirin, and paracetamol.
//!
//! Pipeline walk-through for the demo run:
//!   1. INTAKE → VERIFY: the evaluator flags amoxicillin (allergy) and aspirin
//!      (interaction with current warfarin)
//!   2. Accept is refused while either hard block stands
//!   3. Overrides with a wrong PIN or a blank rationale are refused
//!   4. Overriding amoxicillin alone still leaves aspirin blocking
//!   5. Overriding aspirin lets the pharmacist accept; VERIFY → FILL
//!   6. The override ledger and audit chain are verified

use rxflow_contracts::{
    error::{RxError, RxResult},
    ids::LineId,
    prescription::{Prescription, Priority},
};

use crate::{
    mock_data::{line, pin_for, prescription, PATIENT_ALLERGIC, PHARMACIST, TECHNICIAN},
    runtime::{actor, PharmacyRuntime},
};

/// Drive the scenario on `runtime`, returning the accepted prescription.
pub fn run_on(runtime: &PharmacyRuntime) -> RxResult<Prescription> {
    println!("=== Scenario 1: Allergy and Interaction Override ===");
    println!();

    let pipeline = &runtime.pipeline;
    let technician = actor(TECHNICIAN);
    let pharmacist = actor(PHARMACIST);
    let pin = pin_for(PHARMACIST).unwrap_or_default();

    let rx = pipeline.intake(
        prescription(
            PATIENT_ALLERGIC,
            Priority::Normal,
            vec![
                line("amox", "amox-500", "500 mg", 7, 3),
                line("asp", "asp-75", "75 mg", 30, 1),
                line("para", "para-500", "500 mg", 5, 3),
            ],
        ),
        &technician,
    )?;
    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;

    println!("  Patient:        {} (penicillin allergy, takes warfarin)", PATIENT_ALLERGIC);
    println!("  Stage:          {}", rx.stage);
    println!("  Allergy flags:  {}", join(&rx.flags.allergy_matches));
    println!("  Interactions:   {}", join(&rx.flags.interactions));
    println!();

    // ── Hard block ────────────────────────────────────────────────────────────
    match pipeline.accept(&rx.id, rx.version, &pharmacist) {
        Err(e @ RxError::InvalidState { .. }) => println!("  Accept refused: {}", e),
        Err(e) => return Err(e),
        Ok(_) => println!("  UNEXPECTED: accept succeeded with hard blocks"),
    }

    // ── Refused overrides ─────────────────────────────────────────────────────
    let amox = LineId::new("amox");
    let asp = LineId::new("asp");

    if let Err(e) = pipeline.override_line(&rx.id, &amox, "patient tolerated before", "0000", &pharmacist) {
        println!("  Wrong PIN:      {}", e);
    }
    if let Err(e) = pipeline.override_line(&rx.id, &amox, "   ", &pin, &pharmacist) {
        println!("  Blank reason:   {}", e);
    }

    // ── Partial override ──────────────────────────────────────────────────────
    let rx = pipeline.override_line(
        &rx.id,
        &amox,
        "Rash in childhood only; tolerated cefalexin 2024. Discussed with prescriber.",
        &pin,
        &pharmacist,
    )?;
    println!("  Overridden:     amox (v{})", rx.version);
    if let Err(e) = pipeline.accept(&rx.id, rx.version, &pharmacist) {
        println!("  Still blocked:  {}", e);
    }

    // ── Full override and accept ──────────────────────────────────────────────
    let rx = pipeline.override_line(
        &rx.id,
        &asp,
        "Cardiology co-manages anticoagulation; INR monitored weekly.",
        &pin,
        &pharmacist,
    )?;
    let rx = pipeline.accept(&rx.id, rx.version, &pharmacist)?;
    println!("  Overridden:     asp (v{})", rx.version - 1);
    println!("  Accepted:       now {} at v{}", rx.stage, rx.version);
    println!();

    for entry in runtime.ledger.entries()? {
        println!(
            "  Ledger #{}: line {} by {} ({})",
            entry.sequence, entry.record.line_id, entry.record.actor_id, entry.record.actor_role
        );
    }
    runtime.print_integrity()?;
    println!();
    println!("  Scenario 1 complete.");
    println!();

    Ok(rx)
}

fn join<'a>(ids: impl IntoIterator<Item = &'a LineId>) -> String {
    let names: Vec<&str> = ids.into_iter().map(|l| l.as_str()).collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
