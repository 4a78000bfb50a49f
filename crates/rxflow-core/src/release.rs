//! The release gate: CHECK → RELEASED.
//!
//! Release is the one transition with side effects in other systems. The
//! order is fixed:
//!
//!   1. Role gate (pharmacist or admin) and visual check
//!   2. Claim: a versioned write that keeps the record in CHECK but marks a
//!      release in flight; a competing release fails here with `Conflict`
//!   3. Inventory deduction for every allocation (all-or-nothing)
//!   4. Sale draft creation
//!   5. Dispense event and handoff checklist recorded
//!   6. Versioned commit to RELEASED, audited
//!   7. The ready notification (fire-and-forget)
//!
//! A failure after the claim compensates everything before it: the event is
//! dropped, the draft cancelled, deducted stock restocked, and the claim
//! cleared. The record stays in CHECK.

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use rxflow_contracts::{
    actor::Role,
    audit::PipelineAction,
    dispense::{
        DispenseEvent, DispensedLine, Notification, NotificationKind, SaleDraftLine,
        SaleDraftRequest,
    },
    error::{RxError, RxResult},
    ids::{ActorId, DispenseEventId, PrescriptionId, SaleDraftId},
    prescription::{Prescription, Stage, StockAllocation},
};

use crate::pipeline::{require_stage, Pipeline};

impl Pipeline {
    /// Release a checked prescription to the patient.
    ///
    /// Returns the newly created, immutable `DispenseEvent`.
    pub fn release(
        &self,
        id: &PrescriptionId,
        visual_check_confirmed: bool,
        actor: &ActorId,
    ) -> RxResult<DispenseEvent> {
        let action = PipelineAction::Release;
        let subject = id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        if !role.may_release() {
            return self.deny(
                actor,
                Some(role),
                action,
                &subject,
                format!("role '{}' may not release prescriptions", role),
            );
        }
        if !visual_check_confirmed {
            return Err(RxError::validation(
                "visual check must be confirmed before release",
            ));
        }

        let current = self.store.get(id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;
        require_stage(&current, Stage::Check, action)?;
        ensure_not_releasing(&current)?;
        ensure_fully_allocated(&current)?;

        // ── Claim ─────────────────────────────────────────────────────────────
        let event_id = DispenseEventId::new();
        let mut claimed = current.advanced_to(Stage::Check);
        claimed.release_claim = Some(event_id);
        self.store.compare_and_swap(current.version, claimed.clone())?;
        debug!(
            prescription_id = %id,
            actor = %actor,
            version = claimed.version,
            "release claimed"
        );

        self.release_claimed(&claimed, event_id, actor, role)
            .inspect_err(|_| self.drop_release_claim(id, &event_id))
    }

    /// Everything after the claim. On error the caller clears the claim;
    /// collaborator effects are compensated here.
    fn release_claimed(
        &self,
        claimed: &Prescription,
        event_id: DispenseEventId,
        actor: &ActorId,
        role: Role,
    ) -> RxResult<DispenseEvent> {
        let id = claimed.id;

        // ── Side effects ──────────────────────────────────────────────────────
        self.ext.inventory.deduct(&claimed.allocations)?;

        let now = Utc::now();
        let draft_request = SaleDraftRequest {
            dispense_event_id: event_id,
            prescription_id: id,
            patient_id: claimed.patient_id.clone(),
            lines: claimed
                .allocations
                .iter()
                .map(|a| SaleDraftLine {
                    drug_id: a.drug_id.clone(),
                    batch_id: a.batch_id.clone(),
                    quantity: a.quantity,
                    unit_mrp_minor: a.unit_mrp_minor,
                })
                .collect(),
            subtotal_minor: subtotal_minor(&claimed.allocations),
            expires_at: now + Duration::days(self.settings.sale_draft_ttl_days),
        };

        let draft_id = match self.ext.sale_drafts.create(&draft_request) {
            Ok(draft_id) => draft_id,
            Err(e) => {
                warn!(prescription_id = %id, error = %e, "sale draft failed; restocking");
                self.compensate(&claimed.allocations, None);
                return Err(e);
            }
        };

        let event = DispenseEvent {
            id: event_id,
            prescription_id: id,
            lines: claimed
                .allocations
                .iter()
                .map(|a| DispensedLine {
                    line_id: a.line_id.clone(),
                    batch_id: a.batch_id.clone(),
                    quantity_dispensed: a.quantity,
                })
                .collect(),
            visual_check_confirmed: true,
            released_by: actor.clone(),
            released_at: now,
        };
        if let Err(e) = self.dispenses.insert(event.clone()) {
            self.compensate(&claimed.allocations, Some(&draft_id));
            return Err(e);
        }

        // ── Commit ────────────────────────────────────────────────────────────
        let mut next = claimed.advanced_to(Stage::Released);
        next.dispense_event_id = Some(event_id);
        next.release_claim = None;
        next.next_refill_due =
            Some(now + Duration::days(i64::from(self.days_supply(claimed))));

        let released = match self.commit(claimed, next, PipelineAction::Release, actor, role) {
            Ok(released) => released,
            Err(e) => {
                warn!(prescription_id = %id, error = %e, "release commit failed; compensating");
                if let Err(remove_err) = self.dispenses.remove(&event_id) {
                    error!(
                        dispense_event_id = %event_id,
                        error = %remove_err,
                        "failed to drop dispense event"
                    );
                }
                self.compensate(&claimed.allocations, Some(&draft_id));
                return Err(e);
            }
        };

        info!(
            prescription_id = %id,
            dispense_event_id = %event_id,
            sale_draft_id = %draft_id,
            subtotal_minor = draft_request.subtotal_minor,
            next_refill_due = ?released.next_refill_due,
            "prescription released"
        );

        self.notify(Notification {
            kind: NotificationKind::PrescriptionReady,
            prescription_id: released.id,
            patient_id: released.patient_id.clone(),
            dispense_event_id: event_id,
        });

        Ok(event)
    }

    /// Clear an aborted release's claim. A record that has moved on is left
    /// alone.
    fn drop_release_claim(&self, id: &PrescriptionId, event_id: &DispenseEventId) {
        let result = self.store.get(id).and_then(|stored| {
            if stored.stage != Stage::Check || stored.release_claim != Some(*event_id) {
                return Ok(());
            }
            let mut next = stored.restamped(stored.version + 1);
            next.release_claim = None;
            self.store.compare_and_swap(stored.version, next)
        });
        if let Err(e) = result {
            error!(prescription_id = %id, error = %e, "failed to clear release claim");
        }
    }

    /// Shortest line supply in days, or the configured default.
    fn days_supply(&self, prescription: &Prescription) -> u32 {
        prescription
            .lines
            .iter()
            .filter_map(|l| l.duration_days)
            .filter(|d| *d > 0)
            .min()
            .unwrap_or(self.settings.default_days_supply)
    }

    fn compensate(&self, allocations: &[StockAllocation], draft_id: Option<&SaleDraftId>) {
        if let Some(draft_id) = draft_id {
            if let Err(e) = self.ext.sale_drafts.cancel(draft_id) {
                error!(sale_draft_id = %draft_id, error = %e, "failed to cancel sale draft");
            }
        }
        if let Err(e) = self.ext.inventory.restock(allocations) {
            error!(error = %e, "failed to restock after aborted release");
        }
    }
}

/// `Conflict` while another release of this record is in flight.
pub(crate) fn ensure_not_releasing(prescription: &Prescription) -> RxResult<()> {
    match prescription.release_claim {
        Some(event_id) => Err(RxError::conflict(format!(
            "prescription '{}' is being released (dispense event '{}')",
            prescription.id, event_id
        ))),
        None => Ok(()),
    }
}

fn ensure_fully_allocated(prescription: &Prescription) -> RxResult<()> {
    for line in &prescription.lines {
        if !prescription.allocations.iter().any(|a| a.line_id == line.id) {
            return Err(RxError::invalid_state(format!(
                "line '{}' has no stock allocation",
                line.id
            )));
        }
    }
    Ok(())
}

fn subtotal_minor(allocations: &[StockAllocation]) -> u64 {
    allocations
        .iter()
        .map(|a| u64::from(a.quantity) * a.unit_mrp_minor)
        .sum()
}
