//! rxflow Pharmacy Reference Runtime: Demo CLI
//!
//! Runs one or all of the four pharmacy scenarios. Each scenario uses the
//! real rxflow components (policy engine, clinical evaluator, audit chain,
//! override ledger) wired to in-memory collaborators with fictional data.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- allergy-override
//!   cargo run -p demo -- release-flow
//!   cargo run -p demo -- hold-reminder
//!   cargo run -p demo -- concurrent-accept
//!   cargo run -p demo -- audit-log
//!   cargo run -p demo -- --settings pipeline.toml release-flow

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rxflow_contracts::error::{RxError, RxResult};
use rxflow_core::PipelineSettings;
use rxflow_ref_pharmacy::{
    scenarios::{allergy_override, concurrent_accept, hold_reminder, release_flow},
    PharmacyRuntime,
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// rxflow: prescription pipeline pharmacy demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "rxflow pharmacy reference runtime demo",
    long_about = "Runs rxflow pharmacy scenarios showing clinical hard blocks and overrides,\n\
                  the release gate, holds, optimistic versioning, and audit chain integrity."
)]
struct Cli {
    /// Pipeline settings TOML. Defaults to the embedded settings.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all four scenarios in sequence.
    RunAll,
    /// Scenario 1: Allergy and Interaction Override.
    AllergyOverride,
    /// Scenario 2: Release and Handoff.
    ReleaseFlow,
    /// Scenario 3: Clarification and Stock Holds.
    HoldReminder,
    /// Scenario 4: Concurrent Accept.
    ConcurrentAccept,
    /// Run the release scenario, then print its audit log as JSON.
    AuditLog,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match load_settings(cli.settings.as_ref()) {
        Ok(settings) => dispatch(&cli.command, settings.as_ref()),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> RxResult<Option<PipelineSettings>> {
    path.map(|p| PipelineSettings::from_file(p)).transpose()
}

fn runtime(settings: Option<&PipelineSettings>) -> RxResult<PharmacyRuntime> {
    match settings {
        Some(s) => PharmacyRuntime::with_settings(s.clone()),
        None => PharmacyRuntime::new(),
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

fn dispatch(command: &Command, settings: Option<&PipelineSettings>) -> RxResult<()> {
    match command {
        Command::RunAll => {
            allergy_override::run_on(&runtime(settings)?)?;
            release_flow::run_on(&runtime(settings)?)?;
            hold_reminder::run_on(&runtime(settings)?)?;
            concurrent_accept::run_on(&runtime(settings)?)?;
        }
        Command::AllergyOverride => {
            allergy_override::run_on(&runtime(settings)?)?;
        }
        Command::ReleaseFlow => {
            release_flow::run_on(&runtime(settings)?)?;
        }
        Command::HoldReminder => {
            hold_reminder::run_on(&runtime(settings)?)?;
        }
        Command::ConcurrentAccept => {
            concurrent_accept::run_on(&runtime(settings)?)?;
        }
        Command::AuditLog => {
            let rt = runtime(settings)?;
            release_flow::run_on(&rt)?;
            let log = rt.audit.export_log()?;
            let json = serde_json::to_string_pretty(&log).map_err(|e| RxError::Config {
                reason: format!("failed to serialize audit log: {}", e),
            })?;
            println!("{}", json);
        }
    }
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("rxflow: Prescription Pipeline");
    println!("Pharmacy Reference Demo");
    println!("=============================");
    println!();
    println!("Gates on every pipeline action:");
    println!("  [1] Identity service resolves the actor's role (unknown actors are refused)");
    println!("  [2] Policy engine evaluates (role, action, stage) -> Allow / Deny");
    println!("  [3] Stage and optimistic version are checked");
    println!("  [4] Transition guard runs (clinical flags, stock, label, visual check)");
    println!("  [5] Commit + audit record appended to the SHA-256 chain");
    println!();
}
