//! Scenario 4: Concurrent Accept
//!
//! Two pharmacists open the same prescription in VERIFY and press accept at
//! the same moment against the same version.
//!
//! Pipeline walk-through for the demo run:
//!   1. INTAKE → VERIFY
//!   2. Both pharmacists accept concurrently with the version they read
//!   3. Exactly one commit lands; the other gets a retryable Conflict
//!   4. The loser re-reads, sees FILL, and has nothing left to do
//!   5. The audit chain holds exactly one accept

use std::thread;

use rxflow_contracts::{
    audit::{PipelineAction, TransitionOutcome},
    error::{RxError, RxResult},
    prescription::{Prescription, Priority},
};

use crate::{
    mock_data::{line, prescription, PATIENT_CLEAR, PHARMACIST, SECOND_PHARMACIST, TECHNICIAN},
    runtime::{actor, PharmacyRuntime},
};

/// Outcome of the race, for printing and tests.
#[derive(Debug)]
pub struct RaceOutcome {
    pub prescription: Prescription,
    pub winners: usize,
    pub conflicts: usize,
    pub accept_commits: usize,
}

pub fn run_on(runtime: &PharmacyRuntime) -> RxResult<RaceOutcome> {
    println!("=== Scenario 4: Concurrent Accept ===");
    println!();

    let pipeline = &runtime.pipeline;
    let technician = actor(TECHNICIAN);

    let rx = pipeline.intake(
        prescription(
            PATIENT_CLEAR,
            Priority::Normal,
            vec![line("ibu", "ibu-400", "400 mg", 5, 3)],
        ),
        &technician,
    )?;
    let rx = pipeline.advance(&rx.id, rx.version, &technician)?;
    println!("  Stage:          {} (v{})", rx.stage, rx.version);

    let results: Vec<(String, RxResult<Prescription>)> = thread::scope(|s| {
        let handles: Vec<_> = [PHARMACIST, SECOND_PHARMACIST]
            .into_iter()
            .map(|who| {
                let id = rx.id;
                let version = rx.version;
                s.spawn(move || (who.to_string(), pipeline.accept(&id, version, &actor(who))))
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect()
    });

    let mut winners = 0;
    let mut conflicts = 0;
    for (who, result) in &results {
        match result {
            Ok(accepted) => {
                winners += 1;
                println!("  {:<14}  ACCEPTED -> {} (v{})", who, accepted.stage, accepted.version);
            }
            Err(e @ RxError::Conflict { .. }) => {
                conflicts += 1;
                println!("  {:<14}  CONFLICT  ({}; retryable = {})", who, e, e.is_retryable());
            }
            Err(e) => return Err(e.clone()),
        }
    }

    // ── Loser re-reads ────────────────────────────────────────────────────────
    let current = pipeline.prescription(&rx.id)?;
    println!("  Re-read:        {} (v{})", current.stage, current.version);
    if let Err(e) = pipeline.accept(&current.id, current.version, &actor(SECOND_PHARMACIST)) {
        println!("  Retry:          {}", e);
    }

    let accept_commits = runtime
        .audit
        .records()?
        .iter()
        .filter(|r| r.action == PipelineAction::Accept)
        .filter(|r| matches!(r.outcome, TransitionOutcome::Committed { .. }))
        .count();
    println!("  Accept commits: {}", accept_commits);
    runtime.print_integrity()?;
    println!();
    println!("  Scenario 4 complete.");
    println!();

    Ok(RaceOutcome {
        prescription: current,
        winners,
        conflicts,
        accept_commits,
    })
}
