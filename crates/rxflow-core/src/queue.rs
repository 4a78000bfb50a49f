//! Per-stage queue views for the dashboard.
//!
//! A pure projection over the store: recomputed on every call, never cached,
//! never written back.

use std::collections::BTreeMap;

use rxflow_contracts::{
    error::RxResult,
    prescription::{Prescription, Stage},
};

use crate::pipeline::Pipeline;

/// One stage's ordered work list.
#[derive(Debug, Clone, Default)]
pub struct StageQueue {
    /// Urgent first, then oldest first; ties broken by id.
    pub items: Vec<Prescription>,
    pub total: usize,
    pub urgent: usize,
}

/// Group `prescriptions` by stage. Every stage is present, empty or not.
pub fn project(prescriptions: impl IntoIterator<Item = Prescription>) -> BTreeMap<Stage, StageQueue> {
    let mut queues: BTreeMap<Stage, StageQueue> = Stage::ALL
        .into_iter()
        .map(|s| (s, StageQueue::default()))
        .collect();

    for rx in prescriptions {
        queues.entry(rx.stage).or_default().items.push(rx);
    }

    for queue in queues.values_mut() {
        queue
            .items
            .sort_by_key(|rx| (!rx.is_urgent(), rx.created_at, rx.id));
        queue.total = queue.items.len();
        queue.urgent = queue.items.iter().filter(|rx| rx.is_urgent()).count();
    }

    queues
}

impl Pipeline {
    pub fn queues(&self) -> RxResult<BTreeMap<Stage, StageQueue>> {
        Ok(project(self.store.all()?))
    }

    pub fn queue(&self, stage: Stage) -> RxResult<StageQueue> {
        Ok(project(self.store.all()?.into_iter().filter(|rx| rx.stage == stage))
            .remove(&stage)
            .unwrap_or_default())
    }
}
