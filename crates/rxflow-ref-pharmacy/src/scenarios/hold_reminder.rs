//! Scenario 3: Clarification and Stock Holds
//!
//! A geriatric prescription is parked twice on its way to the shelf.
//!
//! Pipeline walk-through for the demo run:
//!   1. INTAKE → VERIFY: paracetamol 1 g is above the geriatric dose range
//!      (advisory flag)
//!   2. The pharmacist sends it back for clarification: VERIFY → ON_HOLD
//!   3. The corrected lines are entered; resume returns it to INTAKE, and it
//!      is re-verified and accepted
//!   4. FILL cannot reserve enough warfarin; the technician parks it under a
//!      stock hold with a reminder
//!   5. The reminder goes overdue; a delivery is booked in and the hold is
//!      resumed back to FILL; FILL → LABEL reserves from the new batch
//!   6. Hold history shows both holds resolved

use chrono::{Duration, Utc};

use rxflow_contracts::{
    error::{RxError, RxResult},
    hold::HoldCategory,
    prescription::{Prescription, Priority},
};

use crate::{
    mock_data::{
        line, prescription, warfarin_delivery, PATIENT_SENIOR, PHARMACIST, TECHNICIAN,
    },
    runtime::{actor, PharmacyRuntime},
};

/// Drive the scenario on `runtime`, returning the prescription at LABEL.
pub fn run_on(runtime: &PharmacyRuntime) -> RxResult<Prescription> {
    println!("=== Scenario 3: Clarification and Stock Holds ===");
    println!();

    let pipeline = &runtime.pipeline;
    let technician = actor(TECHNICIAN);
    let pharmacist = actor(PHARMACIST);

    // ── Clarification ─────────────────────────────────────────────────────────
    let rx = pipeline.intake(
        prescription(
            PATIENT_SENIOR,
            Priority::Normal,
            vec![
                line("para", "para-500", "1 g", 5, 3),
                line("warf", "warf-5", "5 mg", 100, 1),
            ],
        ),
        &technician,
    )?;
    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;
    println!("  Patient:        {} (age 78)", PATIENT_SENIOR);
    println!("  Dose flags:     {}", rx.flags.dose_out_of_range.len());

    let rx = pipeline.clarify(
        &rx.id,
        "Paracetamol 1 g exceeds the geriatric single-dose range; confirm with prescriber",
        &pharmacist,
    )?;
    println!("  Clarify:        now {}", rx.stage);

    let rx = pipeline.revise_lines(
        &rx.id,
        rx.version,
        vec![
            line("para", "para-500", "500 mg", 5, 3),
            line("warf", "warf-5", "5 mg", 100, 1),
        ],
        &pharmacist,
    )?;
    let rx = pipeline.resume(&rx.id, &pharmacist)?;
    println!("  Revised:        resumed to {}", rx.stage);

    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;
    println!("  Re-verified:    flags clear = {}", rx.flags.is_clear());
    let rx = pipeline.accept(&rx.id, rx.version, &pharmacist)?;
    println!("  Accepted:       now {}", rx.stage);
    println!();

    // ── Stock hold ────────────────────────────────────────────────────────────
    match pipeline.advance(&rx.id, rx.version, &technician) {
        Err(e @ RxError::InvalidState { .. }) => println!("  Fill blocked:   {}", e),
        Err(e) => return Err(e),
        Ok(_) => println!("  UNEXPECTED: fill succeeded without stock"),
    }

    let now = Utc::now();
    let rx = pipeline.hold(
        &rx.id,
        HoldCategory::Stock,
        "Warfarin 5 mg short; wholesaler delivery expected this afternoon",
        Some(now + Duration::hours(4)),
        &technician,
    )?;
    println!("  Stock hold:     now {}", rx.stage);

    let later = now + Duration::hours(5);
    for hold in pipeline.overdue_holds(later)? {
        println!(
            "  Overdue:        {} hold on {} ({})",
            hold.category, hold.prescription_id, hold.reason
        );
    }

    runtime.inventory.receive(warfarin_delivery())?;
    let rx = pipeline.resume(&rx.id, &technician)?;
    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;
    for a in &rx.allocations {
        println!("  Reserved:       {} x{} from batch {}", a.drug_id, a.quantity, a.batch_id);
    }
    println!("  Stage:          {} (v{})", rx.stage, rx.version);
    println!();

    for hold in pipeline.hold_history(&rx.id)? {
        println!(
            "  History:        {:<13} from {:<6} resolved={}",
            hold.category.as_str(),
            hold.prior_stage.as_str(),
            !hold.is_open()
        );
    }
    runtime.print_integrity()?;
    println!();
    println!("  Scenario 3 complete.");
    println!();

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxflow_contracts::prescription::Stage;

    /// Both holds are resolved and the prescription reaches LABEL.
    #[test]
    fn test_hold_scenario_reaches_label() {
        let runtime = PharmacyRuntime::new().unwrap();
        let rx = run_on(&runtime).unwrap();

        assert_eq!(rx.stage, Stage::Label);
        let history = runtime.pipeline.hold_history(&rx.id).unwrap();
        let categories: Vec<HoldCategory> = history.iter().map(|h| h.category).collect();
        assert_eq!(categories, vec![HoldCategory::Clarification, HoldCategory::Stock]);
        assert!(history.iter().all(|h| !h.is_open()));
        let far_future = Utc::now() + Duration::days(1);
        assert!(runtime.pipeline.overdue_holds(far_future).unwrap().is_empty());
    }

    /// The revised paracetamol line replaced the original dose.
    #[test]
    fn test_revision_replaces_lines() {
        let runtime = PharmacyRuntime::new().unwrap();
        let rx = run_on(&runtime).unwrap();
        let para = rx.lines.iter().find(|l| l.id.as_str() == "para").unwrap();
        assert_eq!(para.dose, "500 mg");
        assert!(rx.flags.is_clear());
    }

    /// Warfarin comes from the delivered batch; the short batch is untouched.
    #[test]
    fn test_fill_uses_delivered_batch() {
        let runtime = PharmacyRuntime::new().unwrap();
        let rx = run_on(&runtime).unwrap();

        let warf = rx
            .allocations
            .iter()
            .find(|a| a.line_id.as_str() == "warf")
            .unwrap();
        assert_eq!(warf.batch_id.as_str(), "warf-b2");
        assert_eq!(runtime.inventory.available("warf-b1").unwrap(), 90);
        assert_eq!(runtime.inventory.available("warf-b2").unwrap(), 100);
    }

    /// A failed fill leaves no partial reservation behind.
    #[test]
    fn test_blocked_fill_releases_partial_reservations() {
        let runtime = PharmacyRuntime::new().unwrap();
        let technician = actor(TECHNICIAN);
        let pharmacist = actor(PHARMACIST);
        let p = &runtime.pipeline;

        let rx = p
            .intake(
                prescription(
                    PATIENT_SENIOR,
                    Priority::Normal,
                    vec![
                        line("para", "para-500", "500 mg", 5, 3),
                        line("warf", "warf-5", "5 mg", 100, 1),
                    ],
                ),
                &technician,
            )
            .unwrap();
        let rx = p.advance(&rx.id, rx.version, &technician).unwrap();
        let rx = p.accept(&rx.id, rx.version, &pharmacist).unwrap();

        let result = p.advance(&rx.id, rx.version, &technician);
        assert!(matches!(result, Err(RxError::InvalidState { .. })));
        assert_eq!(runtime.inventory.available("para-b1").unwrap(), 300);
    }

    /// Nothing is overdue before the reminder time.
    #[test]
    fn test_reminder_not_overdue_early() {
        let runtime = PharmacyRuntime::new().unwrap();
        let technician = actor(TECHNICIAN);
        let rx = runtime
            .pipeline
            .intake(
                prescription(PATIENT_SENIOR, Priority::Normal, vec![line("m", "metf-500", "500 mg", 30, 2)]),
                &technician,
            )
            .unwrap();
        let now = Utc::now();
        runtime
            .pipeline
            .hold(
                &rx.id,
                HoldCategory::Insurance,
                "awaiting pre-authorisation",
                Some(now + Duration::hours(2)),
                &technician,
            )
            .unwrap();

        assert!(runtime.pipeline.overdue_holds(now).unwrap().is_empty());
        assert_eq!(
            runtime.pipeline.overdue_holds(now + Duration::hours(3)).unwrap().len(),
            1
        );
    }
}
