//! Holds: taking a prescription out of the linear flow and bringing it back.
//!
//! `HoldRegistry` is the list of hold entries. The pipeline operations below
//! pair every registry change with a versioned stage commit, so a prescription
//! is in ON_HOLD exactly while it has one open hold.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use rxflow_contracts::{
    audit::PipelineAction,
    error::{RxError, RxResult},
    hold::{HoldCategory, HoldEntry},
    ids::{ActorId, HoldId, PrescriptionId},
    prescription::{LineItem, Prescription, Stage},
};

use crate::pipeline::{check_version, require_stage, validate_lines, Pipeline};
use crate::release::ensure_not_releasing;

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct HoldRegistry {
    entries: Mutex<Vec<HoldEntry>>,
}

impl HoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RxResult<MutexGuard<'_, Vec<HoldEntry>>> {
        self.entries
            .lock()
            .map_err(|e| RxError::collaborator("hold registry", format!("lock poisoned: {}", e)))
    }

    /// Append a hold. At most one open hold per prescription.
    pub fn place_hold(&self, entry: HoldEntry) -> RxResult<()> {
        let mut entries = self.lock()?;
        if entries
            .iter()
            .any(|h| h.prescription_id == entry.prescription_id && h.is_open())
        {
            return Err(RxError::conflict(format!(
                "prescription '{}' already has an open hold",
                entry.prescription_id
            )));
        }
        entries.push(entry);
        Ok(())
    }

    /// Close the open hold for `prescription_id` and return it.
    pub fn resolve(
        &self,
        prescription_id: &PrescriptionId,
        at: DateTime<Utc>,
    ) -> RxResult<HoldEntry> {
        let mut entries = self.lock()?;
        let entry = entries
            .iter_mut()
            .find(|h| &h.prescription_id == prescription_id && h.is_open())
            .ok_or_else(|| RxError::not_found("open hold", prescription_id))?;
        entry.resolved_at = Some(at);
        Ok(entry.clone())
    }

    /// Drop a hold whose stage commit lost the race. It never took effect.
    pub fn withdraw(&self, hold_id: &HoldId) -> RxResult<()> {
        self.lock()?.retain(|h| &h.id != hold_id);
        Ok(())
    }

    pub fn set_prior_stage(&self, prescription_id: &PrescriptionId, stage: Stage) -> RxResult<()> {
        let mut entries = self.lock()?;
        let entry = entries
            .iter_mut()
            .find(|h| &h.prescription_id == prescription_id && h.is_open())
            .ok_or_else(|| RxError::not_found("open hold", prescription_id))?;
        entry.prior_stage = stage;
        Ok(())
    }

    pub fn open_for(&self, prescription_id: &PrescriptionId) -> RxResult<Option<HoldEntry>> {
        Ok(self
            .lock()?
            .iter()
            .find(|h| &h.prescription_id == prescription_id && h.is_open())
            .cloned())
    }

    /// Open holds whose reminder is before `now`, earliest reminder first.
    pub fn overdue(&self, now: DateTime<Utc>) -> RxResult<Vec<HoldEntry>> {
        let mut due: Vec<HoldEntry> = self
            .lock()?
            .iter()
            .filter(|h| h.is_overdue(now))
            .cloned()
            .collect();
        due.sort_by_key(|h| (h.reminder_at, h.created_at));
        Ok(due)
    }

    /// Every hold ever placed on `prescription_id`, oldest first.
    pub fn history(&self, prescription_id: &PrescriptionId) -> RxResult<Vec<HoldEntry>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|h| &h.prescription_id == prescription_id)
            .cloned()
            .collect())
    }
}

// ── Pipeline operations ───────────────────────────────────────────────────────

impl Pipeline {
    /// Park a prescription in ON_HOLD from any pre-release stage.
    pub fn hold(
        &self,
        id: &PrescriptionId,
        category: HoldCategory,
        reason: &str,
        reminder_at: Option<DateTime<Utc>>,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        self.place_on_hold(id, PipelineAction::Hold, category, reason, reminder_at, actor)
    }

    /// VERIFY → ON_HOLD under a clarification hold. The prescriber is asked
    /// to correct the order; see `revise_lines`.
    pub fn clarify(
        &self,
        id: &PrescriptionId,
        reason: &str,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        self.place_on_hold(
            id,
            PipelineAction::Clarify,
            HoldCategory::Clarification,
            reason,
            None,
            actor,
        )
    }

    fn place_on_hold(
        &self,
        id: &PrescriptionId,
        action: PipelineAction,
        category: HoldCategory,
        reason: &str,
        reminder_at: Option<DateTime<Utc>>,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        let subject = id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let current = self.store.get(id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;

        if self.holds.open_for(id)?.is_some() {
            return Err(RxError::conflict(format!(
                "prescription '{}' already has an open hold",
                id
            )));
        }
        ensure_not_releasing(&current)?;
        if action == PipelineAction::Clarify {
            require_stage(&current, Stage::Verify, action)?;
        }
        if !current.stage.is_holdable() {
            return Err(RxError::invalid_state(format!(
                "cannot hold prescription '{}' in {}",
                id, current.stage
            )));
        }
        if reason.trim().is_empty() {
            return Err(RxError::validation("hold reason is required"));
        }

        let now = Utc::now();
        let entry = HoldEntry {
            id: HoldId::new(),
            prescription_id: *id,
            category,
            reason: reason.trim().to_string(),
            reminder_at,
            prior_stage: current.stage,
            placed_by: actor.clone(),
            created_at: now,
            resolved_at: None,
        };
        let hold_id = entry.id;
        self.holds.place_hold(entry)?;

        let next = current.advanced_to(Stage::OnHold);
        match self.commit(&current, next, action, actor, role) {
            Ok(held) => {
                info!(
                    prescription_id = %id,
                    category = %category,
                    prior_stage = %current.stage,
                    reminder_at = ?reminder_at,
                    "hold placed"
                );
                Ok(held)
            }
            Err(e) => {
                if let Err(withdraw_err) = self.holds.withdraw(&hold_id) {
                    warn!(hold_id = %hold_id, error = %withdraw_err, "failed to withdraw hold");
                }
                Err(e)
            }
        }
    }

    /// ON_HOLD → the stage the hold was placed from.
    pub fn resume(&self, id: &PrescriptionId, actor: &ActorId) -> RxResult<Prescription> {
        let action = PipelineAction::Resume;
        let subject = id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let current = self.store.get(id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;

        let hold = self
            .holds
            .open_for(id)?
            .ok_or_else(|| RxError::not_found("open hold", id))?;
        require_stage(&current, Stage::OnHold, action)?;

        let next = current.advanced_to(hold.prior_stage);
        let resumed = self.commit(&current, next, action, actor, role)?;
        self.holds.resolve(id, Utc::now())?;

        info!(
            prescription_id = %id,
            category = %hold.category,
            to = %resumed.stage,
            "hold resolved"
        );
        Ok(resumed)
    }

    /// Replace the line items of a prescription parked for clarification.
    ///
    /// Overrides, cached flags, and any allocations are discarded, and the
    /// hold is re-pointed so that `resume` returns the record to INTAKE.
    pub fn revise_lines(
        &self,
        id: &PrescriptionId,
        expected_version: u64,
        lines: Vec<LineItem>,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        let action = PipelineAction::ReviseLines;
        let subject = id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let current = self.store.get(id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;
        check_version(&current, expected_version)?;
        require_stage(&current, Stage::OnHold, action)?;

        match self.holds.open_for(id)? {
            Some(hold) if hold.category == HoldCategory::Clarification => {}
            Some(hold) => {
                return Err(RxError::invalid_state(format!(
                    "lines can only be revised under a clarification hold, found '{}'",
                    hold.category
                )))
            }
            None => return Err(RxError::not_found("open hold", id)),
        }

        validate_lines(&lines)?;

        let mut next = current.advanced_to(Stage::OnHold);
        next.lines = lines;
        next.overridden_lines.clear();
        next.flags = Default::default();
        let stale_allocations = std::mem::take(&mut next.allocations);
        next.label_id = None;

        let revised = self.commit(&current, next, action, actor, role)?;
        self.holds.set_prior_stage(id, Stage::Intake)?;
        self.release_reservations(&stale_allocations);

        info!(
            prescription_id = %id,
            lines = revised.lines.len(),
            "lines revised; resume returns to INTAKE"
        );
        Ok(revised)
    }

    /// Open holds past their reminder time.
    pub fn overdue_holds(&self, now: DateTime<Utc>) -> RxResult<Vec<HoldEntry>> {
        self.holds.overdue(now)
    }

    pub fn hold_history(&self, id: &PrescriptionId) -> RxResult<Vec<HoldEntry>> {
        self.holds.history(id)
    }
}
