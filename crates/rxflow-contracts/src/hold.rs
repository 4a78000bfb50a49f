//! Hold entries: prescriptions parked outside the linear pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ids::{ActorId, HoldId, PrescriptionId},
    prescription::Stage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldCategory {
    Signature,
    Stock,
    Clarification,
    Insurance,
    Price,
}

impl HoldCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldCategory::Signature => "signature",
            HoldCategory::Stock => "stock",
            HoldCategory::Clarification => "clarification",
            HoldCategory::Insurance => "insurance",
            HoldCategory::Price => "price",
        }
    }
}

impl fmt::Display for HoldCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hold. Open while `resolved_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldEntry {
    pub id: HoldId,
    pub prescription_id: PrescriptionId,
    pub category: HoldCategory,
    pub reason: String,
    pub reminder_at: Option<DateTime<Utc>>,
    /// The stage `resume` restores.
    pub prior_stage: Stage,
    pub placed_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl HoldEntry {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Open and past its reminder time.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.reminder_at.is_some_and(|at| at < now)
    }
}
