//! Test orchestration: repeated runs, metric aggregation, and the final
//! verdict against the baseline.

use crate::baseline::{resolve_baseline, BaselineDecision, BaselineRecord, BaselineStore};
use crate::check::{PeakMemoryCheck, VerificationCheck, VerificationResult};
use crate::config::TestConfig;
use crate::error::Result;
use crate::machine::MachineIdentity;
use crate::process::{query_version, ProcessRunner, RunRecord};
use crate::runlog::RunLog;
use std::time::{Duration, Instant};
use tracing::info;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Arithmetic mean ignoring NaN entries. An all-NaN (or empty) input
/// yields NaN.
pub fn nan_mean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &value in values {
        if !value.is_nan() {
            sum += value;
            count += 1;
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Final outcome of one test: the run's exit status combined with every
/// verification result produced against it.
#[derive(Debug)]
pub struct TestVerdict {
    pub test_name: String,

    /// `true` iff every run exited cleanly and every verification result
    /// passed.
    pub passed: bool,

    /// Whether all repetitions exited cleanly.
    pub run_ok: bool,

    /// Mean wall-clock runtime across repetitions, seconds.
    pub avg_runtime_s: f64,

    /// Mean peak resident memory across repetitions, MB. `None` when
    /// monitoring was disabled.
    pub avg_peak_memory_mb: Option<f64>,

    /// The baseline the averages were judged against.
    pub baseline: BaselineDecision,

    /// Runtime deviation from the baseline in percent, when compared.
    pub pct_difference: Option<f64>,

    /// All verification results, in execution order.
    pub results: Vec<VerificationResult>,

    /// Total wall-clock time spent executing the test.
    pub elapsed: Duration,
}

impl TestVerdict {
    /// Acceptable runtime window `[baseline*(1-tol/100), baseline*(1+tol/100)]`.
    pub fn acceptable_range(baseline_s: f64, tolerance_pct: f64) -> (f64, f64) {
        (
            baseline_s * (1.0 - tolerance_pct / 100.0),
            baseline_s * (1.0 + tolerance_pct / 100.0),
        )
    }

    pub fn failed_results(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|result| !result.passed)
    }
}

/// Executes one test: N repetitions of the target, per-run artifact
/// checks, aggregation, and the baseline decision.
pub struct TestRunner {
    config: TestConfig,
    store: BaselineStore,
    checks: Vec<Box<dyn VerificationCheck>>,
    identity: MachineIdentity,
}

impl TestRunner {
    pub fn new(config: TestConfig, store: BaselineStore) -> Self {
        Self {
            config,
            store,
            checks: Vec::new(),
            identity: MachineIdentity::current(),
        }
    }

    /// Add a verification check; checks run in declaration order after
    /// each successful run.
    pub fn with_check(mut self, check: Box<dyn VerificationCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Override the machine identity (tests).
    pub fn with_identity(mut self, identity: MachineIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Run the test to completion and return the verdict.
    pub async fn execute(&self) -> Result<TestVerdict> {
        let started = Instant::now();
        let config = &self.config;

        let mut baseline = if config.compare_baseline {
            resolve_baseline(&self.store, &self.identity, &config.decision).await?
        } else {
            BaselineDecision::none()
        };
        if config.update_baseline {
            baseline.updated = true;
        }

        let runner = ProcessRunner::new(config.launch.clone(), config.monitor.clone())
            .with_current_dir(&config.work_dir);
        let mut durations: Vec<f64> = Vec::new();
        let mut memory_samples: Vec<f64> = Vec::new();
        let mut results: Vec<VerificationResult> = Vec::new();
        let mut run_ok = true;

        for iteration in 0..config.repetitions {
            info!(
                test = %config.name,
                iteration = iteration + 1,
                total = config.repetitions,
                "running executable"
            );

            // Clear leftovers a previous attempt may have produced, so no
            // check inspects stale results.
            for stale in self.checks.iter().flat_map(|check| check.stale_outputs()) {
                if stale.exists() {
                    std::fs::remove_file(&stale)?;
                }
            }

            let log = RunLog::create(&config.work_dir, &config.name)?;
            let record = runner.run(&config.executable, &config.args, &log).await;

            durations.push(record.duration.as_secs_f64());
            if config.monitor.enabled {
                memory_samples.push(record.peak_rss_bytes as f64 / BYTES_PER_MB);
            }

            let record_failed = !record.passed();
            if record_failed {
                run_ok = false;
                results.push(run_failure_result(&record));
            } else {
                // Checks execute only after a clean exit, every one of
                // them, even when an earlier check fails.
                for check in &self.checks {
                    results.push(check.evaluate().await);
                }
            }

            log.archive()?;

            if record_failed {
                break;
            }
        }

        let avg_runtime_s = nan_mean(&durations);
        let avg_peak_memory_mb = if config.monitor.enabled {
            let mean = nan_mean(&memory_samples);
            if mean.is_nan() {
                None
            } else {
                Some(mean)
            }
        } else {
            None
        };

        // Baseline comparison happens only against an established gold
        // row that is not being replaced. A just-elected baseline means
        // the measured averages become the reference, not a comparison.
        let mut pct_difference = None;
        if run_ok && baseline.established && !baseline.updated {
            let pct = (avg_runtime_s - baseline.runtime_s) / baseline.runtime_s * 100.0;
            pct_difference = Some(pct);
            results.push(runtime_tolerance_result(
                avg_runtime_s,
                baseline.runtime_s,
                pct,
                config.time_tolerance_pct,
            ));

            if let (Some(reference_mb), Some(observed_mb)) =
                (baseline.peak_memory_mb, avg_peak_memory_mb)
            {
                let check = PeakMemoryCheck::new(
                    format!("{}_peak_memory", config.name),
                    observed_mb,
                    reference_mb,
                    config.memory_tolerance_pct,
                );
                results.push(check.evaluate().await);
            }
        }

        // A fixed reference from the test definition is enforced
        // independently of the baseline table.
        if run_ok {
            if let (Some(reference), Some(observed_mb)) =
                (&config.memory_reference, avg_peak_memory_mb)
            {
                let check = PeakMemoryCheck::new(
                    format!("{}_peak_memory", config.name),
                    observed_mb,
                    reference.value_mb,
                    reference.tolerance_pct,
                );
                results.push(check.evaluate().await);
            }
        }

        // Persist: a new gold standard carries the measured averages; a
        // plain history row is appended when requested.
        if run_ok && (baseline.updated || config.record_history) {
            let executable_info = query_version(&config.executable)
                .await
                .unwrap_or_else(|| "unknown".to_string());
            let record = BaselineRecord::measured(
                &self.identity,
                avg_runtime_s,
                avg_peak_memory_mb,
                executable_info,
                baseline.updated,
            );
            self.store.append(record)?;
            if baseline.updated {
                info!(test = %config.name, "baseline gold standard updated");
            }
        }

        let passed = run_ok && results.iter().all(|result| result.passed);

        Ok(TestVerdict {
            test_name: config.name.clone(),
            passed,
            run_ok,
            avg_runtime_s,
            avg_peak_memory_mb,
            baseline,
            pct_difference,
            results,
            elapsed: started.elapsed(),
        })
    }
}

fn run_failure_result(record: &RunRecord) -> VerificationResult {
    let err = crate::error::HarnessError::NonZeroExit {
        command: record.command.clone(),
        code: record.exit_code,
    };
    VerificationResult {
        check_name: "run".to_string(),
        passed: false,
        message: err.to_string(),
        elapsed: record.duration,
    }
}

fn runtime_tolerance_result(
    avg_runtime_s: f64,
    baseline_s: f64,
    pct: f64,
    tolerance_pct: f64,
) -> VerificationResult {
    let (low, high) = TestVerdict::acceptable_range(baseline_s, tolerance_pct);
    let passed = pct.abs() <= tolerance_pct;
    let message = format!(
        "average runtime {avg_runtime_s:.2}s vs baseline {baseline_s:.2}s: {pct:.2}% difference, \
         tolerance {tolerance_pct}%, acceptable range [{low:.2}, {high:.2}]"
    );
    VerificationResult {
        check_name: "runtime_tolerance".to_string(),
        passed,
        message,
        elapsed: Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_mean_ignores_nan() {
        assert_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean(&[]).is_nan());
        assert!(nan_mean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_runtime_tolerance_boundary_passes() {
        // 103 vs 100 is exactly a 3% difference: the boundary passes.
        let result = runtime_tolerance_result(103.0, 100.0, (103.0 - 100.0) / 100.0 * 100.0, 3.0);
        assert!(result.passed, "{}", result.message);
    }

    #[test]
    fn test_runtime_tolerance_just_over_fails() {
        let pct = (103.0 - 100.0) / 100.0 * 100.0;
        let result = runtime_tolerance_result(103.0, 100.0, pct, 2.9);
        assert!(!result.passed);
        assert!(result.message.contains("[97.10, 102.90]"));
    }

    #[test]
    fn test_runtime_tolerance_is_symmetric() {
        // A run 5% faster than baseline is also out of a 3% window: a
        // suspiciously fast run usually means the solver did less work.
        let pct = (95.0 - 100.0) / 100.0 * 100.0;
        let result = runtime_tolerance_result(95.0, 100.0, pct, 3.0);
        assert!(!result.passed);
    }

    #[test]
    fn test_acceptable_range() {
        let (low, high) = TestVerdict::acceptable_range(100.0, 3.0);
        assert!((low - 97.0).abs() < 1e-9);
        assert!((high - 103.0).abs() < 1e-9);
    }
}
