//! Pipeline actions and the transition records written to the audit log.
//!
//! Every committed transition, and every authorization denial, produces
//! exactly one `TransitionRecord`. The audit writer appends it; records are
//! never modified.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{actor::Role, ids::ActorId, prescription::Stage};

/// The externally callable pipeline operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    Intake,
    Advance,
    Accept,
    Override,
    Clarify,
    Hold,
    Resume,
    ReviseLines,
    Release,
    Handoff,
    CompleteHandoff,
}

impl PipelineAction {
    /// The action name matched by policy rules.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineAction::Intake => "intake",
            PipelineAction::Advance => "advance",
            PipelineAction::Accept => "accept",
            PipelineAction::Override => "override",
            PipelineAction::Clarify => "clarify",
            PipelineAction::Hold => "hold",
            PipelineAction::Resume => "resume",
            PipelineAction::ReviseLines => "revise_lines",
            PipelineAction::Release => "release",
            PipelineAction::Handoff => "handoff",
            PipelineAction::CompleteHandoff => "complete_handoff",
        }
    }
}

impl fmt::Display for PipelineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an audited action ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionOutcome {
    /// The transition committed. `from` → `to` at `version`.
    Committed { from: Stage, to: Stage, version: u64 },
    /// The action was refused before any state changed.
    Denied { reason: String },
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The record the action targeted (prescription or dispense event id).
    pub subject: String,
    pub action: PipelineAction,
    pub actor_id: ActorId,
    /// `None` when the actor could not be authenticated.
    pub actor_role: Option<Role>,
    pub outcome: TransitionOutcome,
    pub timestamp: DateTime<Utc>,
}
