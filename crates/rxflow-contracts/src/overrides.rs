//! Override ledger records.
//!
//! An override is a pharmacist-authorized clearance of the clinical flags on
//! one line. Records are append-only: never updated, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    actor::Role,
    ids::{ActorId, LineId, OverrideId, PrescriptionId},
};

/// What the pipeline hands the ledger for one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub prescription_id: PrescriptionId,
    pub line_id: LineId,
    pub actor_id: ActorId,
    pub actor_role: Role,
    pub rationale: String,
    pub pin_verified: bool,
}

/// One immutable override record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: OverrideId,
    pub prescription_id: PrescriptionId,
    pub line_id: LineId,
    pub actor_id: ActorId,
    pub actor_role: Role,
    pub rationale: String,
    pub pin_verified: bool,
    pub timestamp: DateTime<Utc>,
}

/// Proof that a record was appended, consumed by the state machine to clear
/// the flags on exactly one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideToken {
    pub override_id: OverrideId,
    pub prescription_id: PrescriptionId,
    pub line_id: LineId,
}

impl OverrideRecord {
    pub fn token(&self) -> OverrideToken {
        OverrideToken {
            override_id: self.id,
            prescription_id: self.prescription_id,
            line_id: self.line_id.clone(),
        }
    }
}
