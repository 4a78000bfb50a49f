//! Patient handoff after release: RELEASED → COMPLETE.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use rxflow_contracts::{
    audit::{PipelineAction, TransitionOutcome},
    dispense::{DispenseEvent, HandoffChecklist, HandoffField, Notification, NotificationKind},
    error::{RxError, RxResult},
    ids::{ActorId, DispenseEventId, PrescriptionId},
    prescription::{Prescription, Stage},
};

use crate::pipeline::{require_stage, Pipeline};

// ── Registry ──────────────────────────────────────────────────────────────────

struct DispenseEntry {
    event: DispenseEvent,
    checklist: HandoffChecklist,
}

/// Dispense events and their checklists, keyed by dispense event id.
#[derive(Default)]
pub struct DispenseRegistry {
    entries: Mutex<HashMap<DispenseEventId, DispenseEntry>>,
}

impl DispenseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RxResult<MutexGuard<'_, HashMap<DispenseEventId, DispenseEntry>>> {
        self.entries.lock().map_err(|e| {
            RxError::collaborator("dispense registry", format!("lock poisoned: {}", e))
        })
    }

    /// Record a new dispense event with an empty checklist.
    ///
    /// A prescription has at most one dispense event.
    pub fn insert(&self, event: DispenseEvent) -> RxResult<()> {
        let mut entries = self.lock()?;
        if entries
            .values()
            .any(|e| e.event.prescription_id == event.prescription_id)
        {
            return Err(RxError::conflict(format!(
                "prescription '{}' already has a dispense event",
                event.prescription_id
            )));
        }
        let checklist = HandoffChecklist::new(event.id);
        entries.insert(event.id, DispenseEntry { event, checklist });
        Ok(())
    }

    /// Drop an event whose release did not commit.
    pub fn remove(&self, id: &DispenseEventId) -> RxResult<()> {
        self.lock()?.remove(id);
        Ok(())
    }

    pub fn event(&self, id: &DispenseEventId) -> RxResult<DispenseEvent> {
        self.lock()?
            .get(id)
            .map(|e| e.event.clone())
            .ok_or_else(|| RxError::not_found("dispense event", id))
    }

    pub fn checklist(&self, id: &DispenseEventId) -> RxResult<HandoffChecklist> {
        self.lock()?
            .get(id)
            .map(|e| e.checklist.clone())
            .ok_or_else(|| RxError::not_found("dispense event", id))
    }

    fn set_field(
        &self,
        id: &DispenseEventId,
        field: HandoffField,
        value: bool,
    ) -> RxResult<HandoffChecklist> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RxError::not_found("dispense event", id))?;
        entry.checklist.set(field, value);
        Ok(entry.checklist.clone())
    }

    pub fn count(&self) -> RxResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn for_prescription(&self, id: &PrescriptionId) -> RxResult<Vec<DispenseEvent>> {
        Ok(self
            .lock()?
            .values()
            .filter(|e| &e.event.prescription_id == id)
            .map(|e| e.event.clone())
            .collect())
    }
}

// ── Pipeline operations ───────────────────────────────────────────────────────

impl Pipeline {
    /// Set or clear one checklist field. Only while the prescription is
    /// RELEASED; a completed handoff is closed.
    pub fn set_handoff_field(
        &self,
        dispense_event_id: &DispenseEventId,
        field: HandoffField,
        value: bool,
        actor: &ActorId,
    ) -> RxResult<HandoffChecklist> {
        let action = PipelineAction::Handoff;
        let subject = dispense_event_id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let event = self.dispenses.event(dispense_event_id)?;
        let prescription = self.store.get(&event.prescription_id)?;
        self.authorize(actor, role, action, Some(prescription.stage), &subject)?;
        require_stage(&prescription, Stage::Released, action)?;

        let checklist = self.dispenses.set_field(dispense_event_id, field, value)?;
        self.record(
            &subject,
            action,
            actor,
            Some(role),
            TransitionOutcome::Committed {
                from: prescription.stage,
                to: prescription.stage,
                version: prescription.version,
            },
        )?;

        debug!(
            dispense_event_id = %dispense_event_id,
            field = %field,
            value,
            progress = checklist.progress_percent(),
            "handoff field updated"
        );
        Ok(checklist)
    }

    /// RELEASED → COMPLETE once all six checklist fields are set.
    pub fn complete_handoff(
        &self,
        dispense_event_id: &DispenseEventId,
        actor: &ActorId,
    ) -> RxResult<Prescription> {
        let action = PipelineAction::CompleteHandoff;
        let subject = dispense_event_id.to_string();
        let role = self.authenticate(actor, action, &subject)?;
        let event = self.dispenses.event(dispense_event_id)?;
        let current = self.store.get(&event.prescription_id)?;
        self.authorize(actor, role, action, Some(current.stage), &subject)?;
        require_stage(&current, Stage::Released, action)?;

        let checklist = self.dispenses.checklist(dispense_event_id)?;
        let missing = checklist.missing();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|f| f.as_str()).collect();
            return Err(RxError::validation(format!(
                "handoff checklist incomplete: {}",
                names.join(", ")
            )));
        }

        let next = current.advanced_to(Stage::Complete);
        let completed = self.commit(&current, next, action, actor, role)?;

        info!(
            prescription_id = %completed.id,
            dispense_event_id = %dispense_event_id,
            "handoff complete"
        );
        self.notify(Notification {
            kind: NotificationKind::HandoffComplete,
            prescription_id: completed.id,
            patient_id: completed.patient_id.clone(),
            dispense_event_id: *dispense_event_id,
        });
        Ok(completed)
    }

    pub fn dispense_event(&self, id: &DispenseEventId) -> RxResult<DispenseEvent> {
        self.dispenses.event(id)
    }

    pub fn handoff_checklist(&self, id: &DispenseEventId) -> RxResult<HandoffChecklist> {
        self.dispenses.checklist(id)
    }

    /// Every dispense event recorded for a prescription. At most one.
    pub fn dispense_events_for(&self, id: &PrescriptionId) -> RxResult<Vec<DispenseEvent>> {
        self.dispenses.for_prescription(id)
    }
}
