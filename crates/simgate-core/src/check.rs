//! Verification checks run against a completed run.
//!
//! Checks are polymorphic behind the [`VerificationCheck`] trait; the
//! runner iterates a declaration-ordered list without caring which
//! concrete check it holds. Every check in the list executes even after
//! an earlier one fails — the point of a verification pass is the full
//! set of diagnostics, not the first one.

use crate::process::ProcessRunner;
use crate::runlog::RunLog;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of one verification check. Immutable once produced.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Name of the check that produced this result.
    pub check_name: String,

    /// Whether the check passed.
    pub passed: bool,

    /// Diagnostic message (always populated; terse on pass).
    pub message: String,

    /// Time spent evaluating the check.
    pub elapsed: Duration,
}

/// A pass/fail check evaluated after the run step.
#[async_trait]
pub trait VerificationCheck: Send + Sync {
    /// Unique name, used for logging and archived log names.
    fn name(&self) -> &str;

    /// Files a previous attempt may have left behind. The runner removes
    /// these before the run step so a check never silently inspects
    /// leftover results.
    fn stale_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Evaluate the check and produce its result.
    async fn evaluate(&self) -> VerificationResult;
}

/// Structural comparison of a produced results file against a gold file
/// using an external comparator tool.
///
/// Invocation: `<tool> -f <spec-file> <results-file> <gold-file>
/// [extra-args...]`; zero exit code means the artifacts match.
#[derive(Debug, Clone)]
pub struct ArtifactDiffCheck {
    name: String,
    tool_path: PathBuf,
    spec_file: PathBuf,
    results_file: PathBuf,
    gold_file: PathBuf,
    extra_args: Vec<String>,
    log_dir: PathBuf,
}

impl ArtifactDiffCheck {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        tool_path: impl Into<PathBuf>,
        spec_file: impl Into<PathBuf>,
        results_file: impl Into<PathBuf>,
        gold_file: impl Into<PathBuf>,
        extra_args: Vec<String>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            tool_path: tool_path.into(),
            spec_file: spec_file.into(),
            results_file: results_file.into(),
            gold_file: gold_file.into(),
            extra_args,
            log_dir: log_dir.into(),
        }
    }
}

#[async_trait]
impl VerificationCheck for ArtifactDiffCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn stale_outputs(&self) -> Vec<PathBuf> {
        vec![self.results_file.clone()]
    }

    async fn evaluate(&self) -> VerificationResult {
        let start = Instant::now();

        // The run step is expected to have produced the results file; a
        // missing file is a diagnosis, not a crash.
        if !self.results_file.exists() {
            let err = crate::error::HarnessError::MissingArtifact {
                path: self.results_file.clone(),
            };
            return VerificationResult {
                check_name: self.name.clone(),
                passed: false,
                message: err.to_string(),
                elapsed: start.elapsed(),
            };
        }

        let log = match RunLog::create(&self.log_dir, &self.name) {
            Ok(log) => log,
            Err(e) => {
                return VerificationResult {
                    check_name: self.name.clone(),
                    passed: false,
                    message: format!("could not create check log: {e}"),
                    elapsed: start.elapsed(),
                };
            }
        };

        let mut args = vec![
            "-f".to_string(),
            self.spec_file.to_string_lossy().into_owned(),
            self.results_file.to_string_lossy().into_owned(),
            self.gold_file.to_string_lossy().into_owned(),
        ];
        args.extend(self.extra_args.iter().cloned());

        let record = ProcessRunner::bare()
            .run(&self.tool_path, &args, &log)
            .await;
        let archived = log.archive().ok();

        let passed = record.passed();
        let message = if passed {
            format!("artifacts match gold file {}", self.gold_file.display())
        } else {
            format!(
                "comparator exited with code {}: {}",
                record.exit_code, record.command
            )
        };

        info!(
            check = %self.name,
            passed,
            log = ?archived,
            "artifact diff evaluated"
        );

        VerificationResult {
            check_name: self.name.clone(),
            passed,
            message,
            elapsed: start.elapsed(),
        }
    }
}

/// Peak-memory tolerance check: the observed peak may exceed the
/// reference by at most `tolerance_pct` percent. Only growth fails; a run
/// using less memory than the reference always passes.
#[derive(Debug, Clone)]
pub struct PeakMemoryCheck {
    name: String,
    observed_mb: f64,
    reference_mb: f64,
    tolerance_pct: f64,
}

impl PeakMemoryCheck {
    pub fn new(
        name: impl Into<String>,
        observed_mb: f64,
        reference_mb: f64,
        tolerance_pct: f64,
    ) -> Self {
        Self {
            name: name.into(),
            observed_mb,
            reference_mb,
            tolerance_pct,
        }
    }

    /// Upper limit implied by the reference and tolerance.
    pub fn upper_limit(&self) -> f64 {
        self.reference_mb * (1.0 + self.tolerance_pct / 100.0)
    }
}

#[async_trait]
impl VerificationCheck for PeakMemoryCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self) -> VerificationResult {
        let start = Instant::now();
        let upper = self.upper_limit();
        let passed = self.observed_mb <= upper;
        let message = format!(
            "peak memory {:.2} MB, reference {:.2} MB, allowed up to {:.2} MB ({}% tolerance)",
            self.observed_mb, self.reference_mb, upper, self.tolerance_pct
        );

        VerificationResult {
            check_name: self.name.clone(),
            passed,
            message,
            elapsed: start.elapsed(),
        }
    }
}
