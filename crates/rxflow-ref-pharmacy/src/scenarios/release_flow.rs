//! Scenario 2: Release and Handoff
//!
//! An urgent, clinically clear prescription travels the whole pipeline.
//!
//! Pipeline walk-through for the demo run:
//!   1. INTAKE → VERIFY → FILL → LABEL → CHECK; FILL reserves stock FEFO,
//!      skipping an expired batch and a batch too small for the line
//!   2. A cashier's release is denied and audited
//!   3. A release without the visual check is refused
//!   4. The pharmacist releases: stock is deducted, a sale draft is opened,
//!      the next refill date is set, and the patient is notified
//!   5. The counter works the six-field handoff checklist; RELEASED → COMPLETE
//!   6. The queue board and audit chain are printed

use rxflow_contracts::{
    dispense::{DispenseEvent, HandoffField},
    error::{RxError, RxResult},
    prescription::{Prescription, Priority},
};

use crate::{
    mock_data::{line, prescription, CASHIER, PATIENT_CLEAR, PHARMACIST, TECHNICIAN},
    runtime::{actor, PharmacyRuntime},
};

/// Drive the scenario on `runtime`, returning the completed prescription and
/// its dispense event.
pub fn run_on(runtime: &PharmacyRuntime) -> RxResult<(Prescription, DispenseEvent)> {
    println!("=== Scenario 2: Release and Handoff ===");
    println!();

    let pipeline = &runtime.pipeline;
    let technician = actor(TECHNICIAN);
    let pharmacist = actor(PHARMACIST);
    let cashier = actor(CASHIER);

    // ── Dispensary ────────────────────────────────────────────────────────────
    let rx = pipeline.intake(
        prescription(
            PATIENT_CLEAR,
            Priority::Urgent,
            vec![
                line("amox", "amox-500", "500 mg", 7, 3),
                line("para", "para-500", "500 mg", 5, 2),
            ],
        ),
        &technician,
    )?;
    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;
    let rx = pipeline.accept(&rx.id, rx.version, &pharmacist)?;
    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;
    for a in &rx.allocations {
        println!("  Reserved:       {} x{} from batch {}", a.drug_id, a.quantity, a.batch_id);
    }
    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;
    println!(
        "  Label:          {}",
        rx.label_id.as_ref().map(|l| l.as_str()).unwrap_or("-")
    );
    println!("  Stage:          {} (v{})", rx.stage, rx.version);
    println!();

    // ── Release gate ──────────────────────────────────────────────────────────
    match pipeline.release(&rx.id, true, &cashier) {
        Err(e @ RxError::Authorization { .. }) => println!("  Cashier release: DENIED ({})", e),
        Err(e) => return Err(e),
        Ok(_) => println!("  UNEXPECTED: cashier released"),
    }
    if let Err(e) = pipeline.release(&rx.id, false, &pharmacist) {
        println!("  No visual check: {}", e);
    }

    let event = pipeline.release(&rx.id, true, &pharmacist)?;
    let released = pipeline.prescription(&rx.id)?;
    println!("  Released:       dispense event {}", event.id);
    for draft in runtime.drafts.open_drafts()? {
        println!(
            "  Sale draft:     {} subtotal {} (expires {})",
            draft.id,
            draft.request.subtotal_minor,
            draft.request.expires_at.format("%Y-%m-%d")
        );
    }
    if let Some(due) = released.next_refill_due {
        println!("  Next refill:    {}", due.format("%Y-%m-%d"));
    }
    println!();

    // ── Handoff ───────────────────────────────────────────────────────────────
    for field in HandoffField::ALL {
        let checklist = pipeline.set_handoff_field(&event.id, field, true, &cashier)?;
        println!("  Handoff:        {:<20} {:>3}%", field.as_str(), checklist.progress_percent());
    }
    let done = pipeline.complete_handoff(&event.id, &cashier)?;
    println!("  Completed:      {} at v{}", done.stage, done.version);
    println!();

    // ── Board ─────────────────────────────────────────────────────────────────
    for (stage, queue) in pipeline.queues()? {
        if queue.total > 0 {
            println!("  Queue {:<9} {} item(s), {} urgent", stage.as_str(), queue.total, queue.urgent);
        }
    }
    println!("  Notifications:  {}", runtime.notifier.sent()?.len());
    runtime.print_integrity()?;
    println!();
    println!("  Scenario 2 complete.");
    println!();

    Ok((done, event))
}
