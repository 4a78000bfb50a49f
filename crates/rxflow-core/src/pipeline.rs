//! The pipeline state machine: the single writer of prescription stage.
//!
//! Every transition entry point follows the same order:
//!
//!   Authenticate → Load → Policy → Version → Stage → Guard → Commit → Audit
//!
//! `Commit` is an optimistic compare-and-swap on the record version. Two
//! actors racing on one prescription both pass the read-side checks, but only
//! one swap succeeds; the other receives `RxError::Conflict` and must re-read.
//! No pipeline-wide lock is ever taken.
//!
//! Holds, release, and handoff live in their own modules as further
//! `impl Pipeline` blocks; this module owns construction, the shared gate
//! helpers, and the INTAKE → VERIFY → FILL → LABEL → CHECK path.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use rxflow_contracts::{
    actor::Role,
    audit::{PipelineAction, TransitionOutcome, TransitionRecord},
    dispense::Notification,
    error::{RxError, RxResult},
    ids::{ActorId, LineId, PrescriptionId},
    overrides::{OverrideRequest, OverrideToken},
    policy::{PolicyContext, PolicyVerdict},
    prescription::{NewPrescription, Prescription, Stage, StockAllocation},
};

use crate::{
    handoff::DispenseRegistry,
    hold::HoldRegistry,
    settings::PipelineSettings,
    traits::{
        AuditWriter, ClinicalEvaluator, IdentityService, Inventory, LabelPrinter, Notifier,
        OverrideLedger, PatientDirectory, PolicyEngine, PrescriptionStore, SaleDrafts,
    },
};

/// How many times an override re-applies its already-recorded token when a
/// concurrent write bumps the version underneath it.
const OVERRIDE_APPLY_ATTEMPTS: usize = 3;

/// The trusted components the pipeline is built from.
pub struct TrustedComponents {
    pub store: Box<dyn PrescriptionStore>,
    pub evaluator: Box<dyn ClinicalEvaluator>,
    pub policy: Box<dyn PolicyEngine>,
    pub audit: Box<dyn AuditWriter>,
    pub ledger: Box<dyn OverrideLedger>,
}

/// The external collaborators the pipeline calls into.
pub struct Collaborators {
    pub patients: Box<dyn PatientDirectory>,
    pub inventory: Box<dyn Inventory>,
    pub sale_drafts: Box<dyn SaleDrafts>,
    pub notifier: Box<dyn Notifier>,
    pub identity: Box<dyn IdentityService>,
    pub labels: Box<dyn LabelPrinter>,
}

/// The prescription fulfillment pipeline.
///
/// One instance serves every prescription and every actor; share it behind an
/// `Arc` across threads.
pub struct Pipeline {
    pub(crate) store: Box<dyn PrescriptionStore>,
    pub(crate) evaluator: Box<dyn ClinicalEvaluator>,
    pub(crate) policy: Box<dyn PolicyEngine>,
    pub(crate) audit: Box<dyn AuditWriter>,
    pub(crate) ledger: Box<dyn OverrideLedger>,
    pub(crate) ext: Collaborators,
    pub(crate) holds: HoldRegistry,
    pub(crate) dispenses: DispenseRegistry,
    pub(crate) settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        trusted: TrustedComponents,
        collaborators: Collaborators,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store: trusted.store,
            evaluator: trusted.evaluator,
            policy: trusted.policy,
            audit: trusted.audit,
            ledger: trusted.ledger,
            ext: collaborators,
            holds: HoldRegistry::new(),
            dispenses: DispenseRegistry::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Current authoritative record.
    pub fn prescription(&self, id: &PrescriptionId) -> RxResult<Prescription> {
        self.store.get(id)
    }

    // ── Intake ────────────────────────────────────────────────────────────────

    /// Create a prescription at INTAKE, version 0.
    ///
    /// Called by the ingestion collaborator. Line ids must be unique and every
    /// quantity positive; an empty line list is accepted here and blocked at
    /// `advance`.
    pub fn intake(&self, new: NewPrescription, actor: &ActorId) -> RxResult<Prescription> {
        let id = PrescriptionId::new();
        let subject = id.to_string();
        let role = self.authenticate(actor, PipelineAction::Intake, &subject)?;
        self.authorize(actor, role, PipelineAction::Intake, None, &subject)?;

        validate_lines(&new.lines)?;

        let prescription = Prescription::from_intake(id, new, Utc::now());
        self.record(
            &subject,
            PipelineAction::Intake,
            actor,
            Some(role),
            TransitionOutcome::Committed {
                from: Stage::Intake,
                to: Stage::Intake,
                version: 0,
            },
        )?;
        self.store.insert(prescription.clone())?;

        info!(
            prescription_id = %prescription.id,
            actor = %actor,
            lines = prescription.lines.len(),
            priority = ?prescription.priority,
            "prescription taken in"
        );
        Ok(prescription)
    }

    // ── Linear advance ────────────────────────────────────────────────────────

    /// Move one step along INTAKE → VERIFY, FILL → LABEL, or LABEL → CHECK.
    ///
    /// VERIFY leaves through `accept`; CHECK leaves through `release`.
    ///
    /// # Guards
    ///
    /// - INTAKE: at least one line item.
    /// - FILL: stock reserved for every line (FEFO, non-expired batches).
    /// - LABEL: label artifact generated by the label printer.
    pub fn advance(
        &self,
        id: &PrescriptionId,
        expected_version: u64,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        let action = PipelineAction::Advance;
        let subject = id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let current = self.store.get(id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;
        check_version(&current, expected_version)?;

        debug!(
            prescription_id = %id,
            stage = %current.stage,
            version = current.version,
            "advance requested"
        );

        match current.stage {
            Stage::Intake => {
                if current.lines.is_empty() {
                    return Err(RxError::invalid_state(
                        "cannot advance to VERIFY: prescription has no line items",
                    ));
                }
                let patient = self.ext.patients.profile(&current.patient_id)?;
                let mut next = current.advanced_to(Stage::Verify);
                next.flags = self
                    .evaluator
                    .evaluate(&current, &patient)
                    .without_lines(&current.overridden_lines);
                if !next.flags.blocking_lines().is_empty() {
                    warn!(
                        prescription_id = %id,
                        blocked_lines = next.flags.blocking_lines().len(),
                        "prescription enters VERIFY with clinical hard blocks"
                    );
                }
                self.commit(&current, next, action, actor, role)
            }

            Stage::Fill => {
                let allocations = self.reserve_stock(&current)?;
                let mut next = current.advanced_to(Stage::Label);
                next.allocations = allocations.clone();
                self.commit(&current, next, action, actor, role)
                    .inspect_err(|_| self.release_reservations(&allocations))
            }

            Stage::Label => {
                let label = self.ext.labels.generate(&current, Utc::now())?;
                let mut next = current.advanced_to(Stage::Check);
                next.label_id = Some(label.id);
                self.commit(&current, next, action, actor, role)
            }

            Stage::Verify => Err(RxError::invalid_state(
                "VERIFY is left through accept, not advance",
            )),
            Stage::Check => Err(RxError::invalid_state(
                "CHECK is left through release, not advance",
            )),
            other => Err(RxError::invalid_state(format!(
                "advance is not defined from {}",
                other
            ))),
        }
    }

    // ── Clinical verification ────────────────────────────────────────────────

    /// VERIFY → FILL.
    ///
    /// Flags are recomputed from current patient data. Any allergy-matched or
    /// interacting line without a recorded override is a hard block and fails
    /// with `InvalidState`. Dose-range flags are advisory and only logged.
    pub fn accept(
        &self,
        id: &PrescriptionId,
        expected_version: u64,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        let action = PipelineAction::Accept;
        let subject = id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let current = self.store.get(id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;
        check_version(&current, expected_version)?;
        require_stage(&current, Stage::Verify, action)?;

        let patient = self.ext.patients.profile(&current.patient_id)?;
        let flags = self.evaluator.evaluate(&current, &patient);

        // A line counts as cleared only if the ledger holds a record for it.
        let recorded: BTreeSet<LineId> = self
            .ledger
            .records_for(id)?
            .into_iter()
            .map(|r| r.line_id)
            .collect();
        let cleared: BTreeSet<LineId> = current
            .overridden_lines
            .intersection(&recorded)
            .cloned()
            .collect();

        let remaining = flags.without_lines(&cleared);
        let blocked = remaining.blocking_lines();
        if !blocked.is_empty() {
            warn!(
                prescription_id = %id,
                actor = %actor,
                blocked_lines = blocked.len(),
                "accept blocked by clinical flags"
            );
            return Err(RxError::invalid_state(format!(
                "clinical hard block on {}; override or clarify before accepting",
                join_lines(&blocked)
            )));
        }
        if !remaining.dose_out_of_range.is_empty() {
            warn!(
                prescription_id = %id,
                lines = %join_lines(&remaining.dose_out_of_range),
                "accepting with advisory dose-range flags"
            );
        }

        let mut next = current.advanced_to(Stage::Fill);
        next.flags = remaining;
        self.commit(&current, next, action, actor, role)
    }

    /// Override the clinical flags on one line. Stays in VERIFY.
    ///
    /// The PIN is checked against the identity service; the ledger refuses the
    /// override unless the PIN verified and the rationale is non-blank.
    pub fn override_line(
        &self,
        id: &PrescriptionId,
        line_id: &LineId,
        rationale: &str,
        pin: &str,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        self.override_lines(id, std::slice::from_ref(line_id), rationale, pin, actor)
    }

    /// Override several lines under one rationale.
    ///
    /// The ledger still receives one record per line. Every named line must
    /// exist and currently carry a flag.
    pub fn override_lines(
        &self,
        id: &PrescriptionId,
        line_ids: &[LineId],
        rationale: &str,
        pin: &str,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        let action = PipelineAction::Override;
        let subject = id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let current = self.store.get(id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;
        require_stage(&current, Stage::Verify, action)?;

        if line_ids.is_empty() {
            return Err(RxError::validation("no line ids given to override"));
        }

        let patient = self.ext.patients.profile(&current.patient_id)?;
        let flags = self.evaluator.evaluate(&current, &patient);
        for line_id in line_ids {
            if current.line(line_id).is_none() {
                return Err(RxError::not_found("line", line_id));
            }
            if !flags.is_flagged(line_id) {
                return Err(RxError::validation(format!(
                    "line '{}' carries no clinical flag to override",
                    line_id
                )));
            }
        }

        let pin_verified = self.ext.identity.verify_pin(actor, pin);
        let mut tokens = Vec::with_capacity(line_ids.len());
        for line_id in line_ids {
            let token = self.ledger.record_override(OverrideRequest {
                prescription_id: *id,
                line_id: line_id.clone(),
                actor_id: actor.clone(),
                actor_role: role,
                rationale: rationale.to_string(),
                pin_verified,
            })?;
            tokens.push(token);
        }

        info!(
            prescription_id = %id,
            actor = %actor,
            lines = tokens.len(),
            "override recorded"
        );

        self.apply_override_tokens(id, &tokens, actor, role)
    }

    /// Clear the flags named by already-recorded tokens.
    ///
    /// The records are in the ledger regardless of what happens here, so a
    /// version race is retried against the fresh record rather than handed back
    /// to the caller.
    fn apply_override_tokens(
        &self,
        id: &PrescriptionId,
        tokens: &[OverrideToken],
        actor: &ActorId,
        role: Role,
    ) -> RxResult<Prescription> {
        let mut last_err = None;
        for _ in 0..OVERRIDE_APPLY_ATTEMPTS {
            let current = self.store.get(id)?;
            require_stage(&current, Stage::Verify, PipelineAction::Override)?;

            let mut next = current.advanced_to(Stage::Verify);
            for token in tokens {
                next.overridden_lines.insert(token.line_id.clone());
                next.flags.clear_line(&token.line_id);
            }

            match self.commit(&current, next, PipelineAction::Override, actor, role) {
                Err(err @ RxError::Conflict { .. }) => {
                    debug!(prescription_id = %id, "override apply raced, retrying");
                    last_err = Some(err);
                }
                other => return other,
            }
        }
        Err(last_err.unwrap_or_else(|| RxError::conflict("override could not be applied")))
    }

    // ── Shared gate helpers ───────────────────────────────────────────────────

    /// Resolve the actor's role. Unknown actors are audited and refused.
    pub(crate) fn authenticate(
        &self,
        actor: &ActorId,
        action: PipelineAction,
        subject: &str,
    ) -> RxResult<Role> {
        match self.ext.identity.role_of(actor) {
            Some(role) => Ok(role),
            None => {
                let reason = "actor is not authenticated".to_string();
                warn!(actor = %actor, action = %action, "unauthenticated actor refused");
                self.record(
                    subject,
                    action,
                    actor,
                    None,
                    TransitionOutcome::Denied { reason: reason.clone() },
                )?;
                Err(RxError::Authorization {
                    actor: actor.to_string(),
                    action: action.to_string(),
                    reason,
                })
            }
        }
    }

    /// Run the policy engine. A `Deny` is audited and returned as
    /// `RxError::Authorization`.
    pub(crate) fn authorize(
        &self,
        actor: &ActorId,
        role: Role,
        action: PipelineAction,
        stage: Option<Stage>,
        subject: &str,
    ) -> RxResult<()> {
        let ctx = PolicyContext {
            actor_id: actor.to_string(),
            role: role.as_str().to_string(),
            action: action.as_str().to_string(),
            stage: stage.map(|s| s.as_str().to_string()),
            resource: subject.to_string(),
        };

        match self.policy.evaluate(&ctx)? {
            PolicyVerdict::Allow => Ok(()),
            PolicyVerdict::Deny { reason } => self.deny(actor, Some(role), action, subject, reason),
        }
    }

    /// Audit a refusal and return it as `RxError::Authorization`.
    pub(crate) fn deny<T>(
        &self,
        actor: &ActorId,
        role: Option<Role>,
        action: PipelineAction,
        subject: &str,
        reason: String,
    ) -> RxResult<T> {
        warn!(
            actor = %actor,
            role = ?role,
            action = %action,
            subject = %subject,
            reason = %reason,
            "action denied"
        );
        self.record(
            subject,
            action,
            actor,
            role,
            TransitionOutcome::Denied { reason: reason.clone() },
        )?;
        Err(RxError::Authorization {
            actor: actor.to_string(),
            action: action.to_string(),
            reason,
        })
    }

    /// Swap `next` in for `current` and audit the committed transition.
    ///
    /// A transition that cannot be audited does not stand: the stored record
    /// is put back to `current`'s contents under a newer version and the
    /// audit error is returned.
    pub(crate) fn commit(
        &self,
        current: &Prescription,
        next: Prescription,
        action: PipelineAction,
        actor: &ActorId,
        role: Role,
    ) -> RxResult<Prescription> {
        self.store.compare_and_swap(current.version, next.clone())?;

        let audited = self.record(
            &next.id.to_string(),
            action,
            actor,
            Some(role),
            TransitionOutcome::Committed {
                from: current.stage,
                to: next.stage,
                version: next.version,
            },
        );
        if let Err(e) = audited {
            error!(
                prescription_id = %next.id,
                action = %action,
                version = next.version,
                error = %e,
                "transition could not be audited; reverting"
            );
            let reverted = current.restamped(next.version + 1);
            if let Err(revert_err) = self.store.compare_and_swap(next.version, reverted) {
                error!(
                    prescription_id = %next.id,
                    error = %revert_err,
                    "failed to revert unaudited transition"
                );
            }
            return Err(e);
        }

        info!(
            prescription_id = %next.id,
            actor = %actor,
            action = %action,
            from = %current.stage,
            to = %next.stage,
            version = next.version,
            "transition committed"
        );
        Ok(next)
    }

    pub(crate) fn record(
        &self,
        subject: &str,
        action: PipelineAction,
        actor: &ActorId,
        role: Option<Role>,
        outcome: TransitionOutcome,
    ) -> RxResult<()> {
        self.audit.write(&TransitionRecord {
            subject: subject.to_string(),
            action,
            actor_id: actor.clone(),
            actor_role: role,
            outcome,
            timestamp: Utc::now(),
        })
    }

    /// Fire-and-forget notification. Failures are logged, never returned.
    pub(crate) fn notify(&self, notification: Notification) {
        if let Err(e) = self.ext.notifier.send(&notification) {
            warn!(
                prescription_id = %notification.prescription_id,
                kind = ?notification.kind,
                error = %e,
                "notification failed; continuing"
            );
        }
    }

    // ── Stock reservation ─────────────────────────────────────────────────────

    /// Reserve stock for every line from the first non-expired FEFO batch that
    /// can cover it. All-or-nothing: a failure releases what was reserved.
    fn reserve_stock(&self, prescription: &Prescription) -> RxResult<Vec<StockAllocation>> {
        let today = Utc::now().date_naive();
        let mut allocations: Vec<StockAllocation> = Vec::with_capacity(prescription.lines.len());

        for line in &prescription.lines {
            let batches = match self.ext.inventory.batch_lookup(&line.drug_id) {
                Ok(batches) => batches,
                Err(e) => {
                    self.release_reservations(&allocations);
                    return Err(e);
                }
            };

            let Some(batch) = batches
                .into_iter()
                .find(|b| !b.is_expired(today) && b.available >= line.quantity)
            else {
                self.release_reservations(&allocations);
                warn!(
                    prescription_id = %prescription.id,
                    line_id = %line.id,
                    "no unexpired batch can cover line"
                );
                return Err(RxError::invalid_state(format!(
                    "stock could not be reserved for line '{}'",
                    line.id
                )));
            };

            if let Err(e) = self.ext.inventory.reserve(&batch.id, line.quantity) {
                self.release_reservations(&allocations);
                return Err(e);
            }

            debug!(
                prescription_id = %prescription.id,
                line_id = %line.id,
                batch_id = %batch.id,
                quantity = line.quantity,
                "stock reserved"
            );
            allocations.push(StockAllocation {
                line_id: line.id.clone(),
                drug_id: line.drug_id.clone(),
                batch_id: batch.id,
                quantity: line.quantity,
                unit_mrp_minor: batch.unit_mrp_minor,
            });
        }

        Ok(allocations)
    }

    pub(crate) fn release_reservations(&self, allocations: &[StockAllocation]) {
        for allocation in allocations {
            if let Err(e) = self
                .ext
                .inventory
                .release_reservation(&allocation.batch_id, allocation.quantity)
            {
                warn!(
                    batch_id = %allocation.batch_id,
                    quantity = allocation.quantity,
                    error = %e,
                    "failed to release stock reservation"
                );
            }
        }
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────────

pub(crate) fn check_version(current: &Prescription, expected_version: u64) -> RxResult<()> {
    if current.version != expected_version {
        return Err(RxError::conflict(format!(
            "prescription '{}' is at version {}, request was based on version {}",
            current.id, current.version, expected_version
        )));
    }
    Ok(())
}

pub(crate) fn require_stage(
    current: &Prescription,
    expected: Stage,
    action: PipelineAction,
) -> RxResult<()> {
    if current.stage != expected {
        return Err(RxError::invalid_state(format!(
            "{} requires stage {}, prescription '{}' is in {}",
            action, expected, current.id, current.stage
        )));
    }
    Ok(())
}

pub(crate) fn validate_lines(lines: &[rxflow_contracts::prescription::LineItem]) -> RxResult<()> {
    let mut seen = BTreeSet::new();
    for line in lines {
        if !seen.insert(&line.id) {
            return Err(RxError::validation(format!("duplicate line id '{}'", line.id)));
        }
        if line.quantity == 0 {
            return Err(RxError::validation(format!(
                "line '{}' has zero quantity",
                line.id
            )));
        }
    }
    Ok(())
}

fn join_lines(lines: &BTreeSet<LineId>) -> String {
    lines
        .iter()
        .map(|l| format!("'{}'", l))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use rxflow_contracts::{
        actor::Role,
        audit::{PipelineAction, TransitionOutcome},
        error::RxError,
        ids::{ActorId, LineId},
        prescription::Stage,
    };

    use crate::test_support::{
        line, new_rx, pharmacist, stranger, technician, Harness, PIN,
    };

    // ── Intake and linear advance ────────────────────────────────────────────

    #[test]
    fn intake_creates_version_zero_record() {
        let h = Harness::new();
        let rx = h.intake(vec![line("l1", "amoxicillin", 10)]);

        assert_eq!(rx.stage, Stage::Intake);
        assert_eq!(rx.version, 0);
        assert_eq!(h.pipeline.prescription(&rx.id).unwrap().version, 0);
        assert_eq!(h.audit.count(PipelineAction::Intake), 1);
    }

    #[test]
    fn intake_rejects_duplicate_line_ids() {
        let h = Harness::new();
        let result = h.pipeline.intake(
            new_rx(vec![line("l1", "amoxicillin", 10), line("l1", "ibuprofen", 5)]),
            &technician(),
        );
        assert!(matches!(result, Err(RxError::Validation { .. })));
    }

    #[test]
    fn intake_rejects_zero_quantity() {
        let h = Harness::new();
        let result = h
            .pipeline
            .intake(new_rx(vec![line("l1", "amoxicillin", 0)]), &technician());
        assert!(matches!(result, Err(RxError::Validation { .. })));
    }

    #[test]
    fn empty_prescription_cannot_leave_intake() {
        let h = Harness::new();
        let rx = h.intake(vec![]);

        let result = h.pipeline.advance(&rx.id, rx.version, &technician());
        assert!(matches!(result, Err(RxError::InvalidState { .. })));
        assert_eq!(h.pipeline.prescription(&rx.id).unwrap().stage, Stage::Intake);
    }

    #[test]
    fn every_commit_bumps_version_by_one() {
        let h = Harness::new();
        let rx = h.at_check(vec![line("l1", "amoxicillin", 10)]);

        assert_eq!(rx.stage, Stage::Check);
        assert_eq!(rx.version, 4);
        assert!(rx.label_id.is_some());
        assert_eq!(rx.allocations.len(), 1);
    }

    #[test]
    fn unaudited_accept_is_reverted() {
        let h = Harness::new();
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);
        h.audit.fail_committed(PipelineAction::Accept);

        let result = h.pipeline.accept(&rx.id, rx.version, &pharmacist());
        assert!(matches!(result, Err(RxError::AuditWriteFailed { .. })));

        let stored = h.pipeline.prescription(&rx.id).unwrap();
        assert_eq!(stored.stage, Stage::Verify);
        assert_eq!(stored.version, rx.version + 2);
        assert_eq!(h.audit.count(PipelineAction::Accept), 0);

        h.audit.clear_failure();
        let accepted = h.pipeline.accept(&rx.id, stored.version, &pharmacist()).unwrap();
        assert_eq!(accepted.stage, Stage::Fill);
    }

    #[test]
    fn unaudited_fill_advance_returns_reserved_stock() {
        let h = Harness::new();
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);
        let rx = h.pipeline.accept(&rx.id, rx.version, &pharmacist()).unwrap();
        h.audit.fail_committed(PipelineAction::Advance);

        let result = h.pipeline.advance(&rx.id, rx.version, &technician());
        assert!(matches!(result, Err(RxError::AuditWriteFailed { .. })));

        let stored = h.pipeline.prescription(&rx.id).unwrap();
        assert_eq!(stored.stage, Stage::Fill);
        assert!(stored.allocations.is_empty());
        assert_eq!(h.inventory.available("amox-a"), 100);
    }

    #[test]
    fn unaudited_intake_stores_nothing() {
        let h = Harness::new();
        h.audit.fail_committed(PipelineAction::Intake);

        let result = h
            .pipeline
            .intake(new_rx(vec![line("l1", "amoxicillin", 10)]), &technician());
        assert!(matches!(result, Err(RxError::AuditWriteFailed { .. })));
        assert!(h.pipeline.queues().unwrap().values().all(|q| q.total == 0));
    }

    #[test]
    fn verify_and_check_are_not_left_through_advance() {
        let h = Harness::new();
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);
        let result = h.pipeline.advance(&rx.id, rx.version, &technician());
        assert!(matches!(result, Err(RxError::InvalidState { .. })));

        let rx = h.at_check(vec![line("l2", "ibuprofen", 10)]);
        let result = h.pipeline.advance(&rx.id, rx.version, &technician());
        assert!(matches!(result, Err(RxError::InvalidState { .. })));
    }

    #[test]
    fn stale_version_conflicts_and_leaves_record_unchanged() {
        let h = Harness::new();
        let rx = h.intake(vec![line("l1", "amoxicillin", 10)]);
        h.pipeline.advance(&rx.id, 0, &technician()).unwrap();

        let result = h.pipeline.advance(&rx.id, 0, &technician());
        assert!(matches!(result, Err(RxError::Conflict { .. })));

        let stored = h.pipeline.prescription(&rx.id).unwrap();
        assert_eq!(stored.stage, Stage::Verify);
        assert_eq!(stored.version, 1);
    }

    // ── Authentication and policy ────────────────────────────────────────────

    #[test]
    fn unauthenticated_actor_is_refused_and_audited() {
        let h = Harness::new();
        let rx = h.intake(vec![line("l1", "amoxicillin", 10)]);

        let result = h.pipeline.advance(&rx.id, rx.version, &stranger());
        assert!(matches!(result, Err(RxError::Authorization { .. })));

        let denials = h.audit.denials();
        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0].actor_role, None);
        assert_eq!(h.pipeline.prescription(&rx.id).unwrap().version, 0);
    }

    #[test]
    fn policy_denial_blocks_the_transition_and_is_audited() {
        let h = Harness::new();
        h.policy.deny(Role::Technician, PipelineAction::Advance);
        let rx = h
            .pipeline
            .intake(new_rx(vec![line("l1", "amoxicillin", 10)]), &pharmacist())
            .unwrap();

        let result = h.pipeline.advance(&rx.id, rx.version, &technician());
        assert!(matches!(result, Err(RxError::Authorization { .. })));

        let denials = h.audit.denials();
        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0].action, PipelineAction::Advance);
        assert_eq!(denials[0].actor_role, Some(Role::Technician));
        assert_eq!(h.pipeline.prescription(&rx.id).unwrap().stage, Stage::Intake);
    }

    // ── Clinical verification ────────────────────────────────────────────────

    #[test]
    fn allergy_flag_blocks_accept_until_overridden() {
        let h = Harness::new();
        h.evaluator.flag_allergy("l1");
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);
        assert!(rx.flags.allergy_matches.contains(&LineId::new("l1")));

        let blocked = h.pipeline.accept(&rx.id, rx.version, &pharmacist());
        match blocked {
            Err(RxError::InvalidState { reason }) => assert!(reason.contains("l1")),
            other => panic!("expected InvalidState, got {:?}", other),
        }

        let rx = h
            .pipeline
            .override_line(
                &rx.id,
                &LineId::new("l1"),
                "patient tolerated before",
                PIN,
                &pharmacist(),
            )
            .unwrap();
        assert_eq!(rx.stage, Stage::Verify);
        assert!(rx.overridden_lines.contains(&LineId::new("l1")));
        assert!(!rx.flags.is_flagged(&LineId::new("l1")));

        let accepted = h.pipeline.accept(&rx.id, rx.version, &pharmacist()).unwrap();
        assert_eq!(accepted.stage, Stage::Fill);
        assert_eq!(h.ledger.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn override_with_wrong_pin_writes_nothing() {
        let h = Harness::new();
        h.evaluator.flag_interaction("l1");
        let rx = h.at_verify(vec![line("l1", "warfarin", 10)]);

        let result = h.pipeline.override_line(
            &rx.id,
            &LineId::new("l1"),
            "monitored INR",
            "0000",
            &pharmacist(),
        );
        assert!(matches!(result, Err(RxError::Validation { .. })));
        assert!(h.ledger.records.lock().unwrap().is_empty());

        let stored = h.pipeline.prescription(&rx.id).unwrap();
        assert_eq!(stored.version, rx.version);
        assert!(stored.flags.is_flagged(&LineId::new("l1")));
    }

    #[test]
    fn override_with_blank_rationale_writes_nothing() {
        let h = Harness::new();
        h.evaluator.flag_allergy("l1");
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);

        let result = h
            .pipeline
            .override_line(&rx.id, &LineId::new("l1"), "   ", PIN, &pharmacist());
        assert!(matches!(result, Err(RxError::Validation { .. })));
        assert!(h.ledger.records.lock().unwrap().is_empty());
    }

    #[test]
    fn override_clears_only_the_named_line() {
        let h = Harness::new();
        h.evaluator.flag_allergy("l1");
        h.evaluator.flag_interaction("l2");
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10), line("l2", "warfarin", 10)]);

        let rx = h
            .pipeline
            .override_line(&rx.id, &LineId::new("l1"), "desensitised", PIN, &pharmacist())
            .unwrap();
        assert!(rx.flags.is_flagged(&LineId::new("l2")));

        let result = h.pipeline.accept(&rx.id, rx.version, &pharmacist());
        assert!(matches!(result, Err(RxError::InvalidState { .. })));
    }

    #[test]
    fn batch_override_writes_one_record_per_line() {
        let h = Harness::new();
        h.evaluator.flag_allergy("l1");
        h.evaluator.flag_interaction("l2");
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10), line("l2", "warfarin", 10)]);

        let rx = h
            .pipeline
            .override_lines(
                &rx.id,
                &[LineId::new("l1"), LineId::new("l2")],
                "reviewed with prescriber",
                PIN,
                &pharmacist(),
            )
            .unwrap();
        assert_eq!(h.ledger.records.lock().unwrap().len(), 2);

        let accepted = h.pipeline.accept(&rx.id, rx.version, &pharmacist()).unwrap();
        assert_eq!(accepted.stage, Stage::Fill);
    }

    #[test]
    fn override_of_unflagged_line_is_rejected() {
        let h = Harness::new();
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);

        let result = h
            .pipeline
            .override_line(&rx.id, &LineId::new("l1"), "no reason", PIN, &pharmacist());
        assert!(matches!(result, Err(RxError::Validation { .. })));
    }

    #[test]
    fn override_of_unknown_line_is_not_found() {
        let h = Harness::new();
        h.evaluator.flag_allergy("l1");
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);

        let result = h
            .pipeline
            .override_line(&rx.id, &LineId::new("l9"), "typo", PIN, &pharmacist());
        assert!(matches!(result, Err(RxError::NotFound { entity: "line", .. })));
    }

    #[test]
    fn dose_flag_is_advisory() {
        let h = Harness::new();
        h.evaluator.flag_dose("l1");
        let rx = h.at_verify(vec![line("l1", "ibuprofen", 10)]);

        let accepted = h.pipeline.accept(&rx.id, rx.version, &pharmacist()).unwrap();
        assert_eq!(accepted.stage, Stage::Fill);
        assert!(accepted.flags.dose_out_of_range.contains(&LineId::new("l1")));
    }

    #[test]
    fn concurrent_accepts_yield_one_commit_and_one_conflict() {
        let h = Harness::new();
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 10)]);
        let second = ActorId::new("admin-1");

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| h.pipeline.accept(&rx.id, rx.version, &pharmacist()));
            let b = s.spawn(|| h.pipeline.accept(&rx.id, rx.version, &second));
            (a.join().unwrap(), b.join().unwrap())
        });

        let ok = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(RxError::Conflict { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 1);

        let stored = h.pipeline.prescription(&rx.id).unwrap();
        assert_eq!(stored.stage, Stage::Fill);
        assert_eq!(stored.version, rx.version + 1);

        let commits = h
            .audit
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.action == PipelineAction::Accept
                    && matches!(r.outcome, TransitionOutcome::Committed { .. })
            })
            .count();
        assert_eq!(commits, 1);
    }

    // ── Stock reservation ────────────────────────────────────────────────────

    #[test]
    fn fill_reserves_stock_per_line() {
        let h = Harness::new();
        let rx = h.at_check(vec![line("l1", "amoxicillin", 10), line("l2", "ibuprofen", 4)]);

        assert_eq!(rx.allocations.len(), 2);
        assert_eq!(h.inventory.available("amox-a"), 90);
        assert_eq!(h.inventory.available("ibu-a"), 96);
    }

    #[test]
    fn expired_batches_are_never_reserved() {
        let h = Harness::new();
        let rx = h.at_verify(vec![line("l1", "expired-only", 1)]);
        let rx = h.pipeline.accept(&rx.id, rx.version, &pharmacist()).unwrap();

        let result = h.pipeline.advance(&rx.id, rx.version, &technician());
        assert!(matches!(result, Err(RxError::InvalidState { .. })));
        assert_eq!(h.inventory.available("old-a"), 100);
        assert_eq!(h.pipeline.prescription(&rx.id).unwrap().stage, Stage::Fill);
    }

    #[test]
    fn failed_reservation_rolls_back_earlier_lines() {
        let h = Harness::new();
        let rx = h.at_verify(vec![line("l1", "amoxicillin", 5), line("l2", "scarce", 10)]);
        let rx = h.pipeline.accept(&rx.id, rx.version, &pharmacist()).unwrap();

        let result = h.pipeline.advance(&rx.id, rx.version, &technician());
        match result {
            Err(RxError::InvalidState { reason }) => assert!(reason.contains("l2")),
            other => panic!("expected InvalidState, got {:?}", other),
        }
        assert_eq!(h.inventory.available("amox-a"), 100);
        assert_eq!(h.inventory.available("scarce-a"), 2);
    }
}
