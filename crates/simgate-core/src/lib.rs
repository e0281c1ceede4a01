//! simgate-core — verification harness for numerical simulation
//! executables.
//!
//! Provides the pieces the `simgate` CLI composes:
//! - process execution with full output capture and launch-prefix support
//! - concurrent peak resident-memory monitoring of the process tree
//! - polymorphic verification checks (artifact diff, peak-memory bound)
//! - a persisted per-machine baseline history with gold-standard
//!   selection and update semantics
//! - test orchestration, aggregation, and pass/fail reporting

pub mod baseline;
pub mod check;
pub mod config;
pub mod error;
pub mod machine;
pub mod memory;
pub mod process;
pub mod report;
pub mod runlog;
pub mod runner;
pub mod telemetry;

// Re-export key types
pub use baseline::{
    resolve_baseline, BaselineDecision, BaselineRecord, BaselineStore, GoldLookup,
};
pub use check::{ArtifactDiffCheck, PeakMemoryCheck, VerificationCheck, VerificationResult};
pub use config::{DecisionPolicy, LaunchConfig, MemoryReference, MonitorConfig, TestConfig};
pub use error::{HarnessError, Result};
pub use machine::MachineIdentity;
pub use memory::{aggregate_tree_rss, MemoryMonitor, ProcessSample};
pub use process::{query_version, ProcessRunner, RunRecord, EXIT_FAULT, EXIT_NOT_FOUND};
pub use report::{render_diagnostics, render_verdict_line, SuiteSummary};
pub use runlog::RunLog;
pub use runner::{nan_mean, TestRunner, TestVerdict};
pub use telemetry::init_tracing;

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
