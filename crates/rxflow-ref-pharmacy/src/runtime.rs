//! Wires a `Pipeline` from the embedded configuration and the in-memory
//! collaborators, keeping `Arc` handles for inspection.

use std::sync::Arc;

use tracing::info;

use rxflow_audit::{InMemoryAuditWriter, InMemoryOverrideLedger};
use rxflow_clinical::ReferenceEvaluator;
use rxflow_contracts::{error::RxResult, ids::ActorId};
use rxflow_core::{
    Collaborators, InMemoryPrescriptionStore, Pipeline, PipelineSettings, TrustedComponents,
};
use rxflow_policy::engine::TomlPolicyEngine;

use crate::{
    collaborators::{
        InMemoryInventory, RecordingNotifier, RecordingSaleDrafts, SequentialLabelPrinter,
        StaticIdentity, StaticPatients,
    },
    mock_data,
};

// ── Embedded configuration ────────────────────────────────────────────────────

pub const PHARMACY_POLICY: &str = include_str!("../config/policy.toml");
pub const CLINICAL_REFERENCE: &str = include_str!("../config/clinical.toml");
pub const PIPELINE_SETTINGS: &str = include_str!("../config/pipeline.toml");

/// A fully wired pipeline and handles to everything a scenario inspects.
pub struct PharmacyRuntime {
    pub pipeline: Pipeline,
    pub audit: Arc<InMemoryAuditWriter>,
    pub ledger: Arc<InMemoryOverrideLedger>,
    pub inventory: Arc<InMemoryInventory>,
    pub drafts: Arc<RecordingSaleDrafts>,
    pub notifier: Arc<RecordingNotifier>,
    pub labels: Arc<SequentialLabelPrinter>,
}

impl PharmacyRuntime {
    pub fn new() -> RxResult<Self> {
        Self::with_settings(PipelineSettings::from_toml_str(PIPELINE_SETTINGS)?)
    }

    pub fn with_settings(settings: PipelineSettings) -> RxResult<Self> {
        let policy = TomlPolicyEngine::from_toml_str(PHARMACY_POLICY)?;
        let evaluator = ReferenceEvaluator::from_toml_str(CLINICAL_REFERENCE)?;

        let audit = Arc::new(InMemoryAuditWriter::new("transitions"));
        let ledger = Arc::new(InMemoryOverrideLedger::new());
        let inventory = Arc::new(InMemoryInventory::new(mock_data::opening_stock()));
        let drafts = Arc::new(RecordingSaleDrafts::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let labels = Arc::new(SequentialLabelPrinter::new());

        info!(
            policy_rules = policy.rule_count(),
            drugs = evaluator.reference().drugs.len(),
            "pharmacy runtime configured"
        );

        let pipeline = Pipeline::new(
            TrustedComponents {
                store: Box::new(InMemoryPrescriptionStore::new()),
                evaluator: Box::new(evaluator),
                policy: Box::new(policy),
                audit: Box::new(Arc::clone(&audit)),
                ledger: Box::new(Arc::clone(&ledger)),
            },
            Collaborators {
                patients: Box::new(StaticPatients::new(mock_data::patients())),
                inventory: Box::new(Arc::clone(&inventory)),
                sale_drafts: Box::new(Arc::clone(&drafts)),
                notifier: Box::new(Arc::clone(&notifier)),
                identity: Box::new(StaticIdentity::new(mock_data::staff())),
                labels: Box::new(Arc::clone(&labels)),
            },
            settings,
        );

        Ok(Self {
            pipeline,
            audit,
            ledger,
            inventory,
            drafts,
            notifier,
            labels,
        })
    }

    /// Print the audit and override chain status.
    pub fn print_integrity(&self) -> RxResult<()> {
        println!(
            "  Audit chain integrity:     {} ({} event(s))",
            if self.audit.verify_integrity() { "VERIFIED" } else { "FAILED" },
            self.audit.records()?.len()
        );
        println!(
            "  Override ledger integrity: {} ({} record(s))",
            if self.ledger.verify_integrity() { "VERIFIED" } else { "FAILED" },
            self.ledger.entries()?.len()
        );
        Ok(())
    }
}

pub fn actor(id: &str) -> ActorId {
    ActorId::new(id)
}
