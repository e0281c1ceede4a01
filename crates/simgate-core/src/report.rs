//! User-facing pass/fail reporting.
//!
//! One colored line per test, diagnostics for every failed result, and a
//! suite-level summary with the aggregate count.

use crate::runner::TestVerdict;
use std::time::Duration;

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

/// The per-test status line: `PASS:    time(s): 1.2345e0    test: name`.
pub fn render_verdict_line(verdict: &TestVerdict) -> String {
    if verdict.passed {
        format!(
            "{GREEN}PASS:{RESET}    time(s): {:.4e}    test: {:<20}",
            verdict.avg_runtime_s, verdict.test_name
        )
    } else {
        format!(
            "{RED}FAIL:{RESET}    time(s): {:.4e}    test: {:<20}",
            verdict.avg_runtime_s, verdict.test_name
        )
    }
}

/// Diagnostic lines for a verdict: one per failed result, plus the
/// percentage difference when a baseline comparison happened.
pub fn render_diagnostics(verdict: &TestVerdict) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(pct) = verdict.pct_difference {
        lines.push(format!(
            "Baseline runtime: {:.2}s, percentage difference: {:.2}%",
            verdict.baseline.runtime_s, pct
        ));
    }
    if verdict.baseline.updated {
        lines.push("The baseline has been updated.".to_string());
    }
    for result in verdict.failed_results() {
        lines.push(format!("{}: {}", result.check_name, result.message));
    }
    lines
}

/// Aggregate pass/fail tally for a whole suite invocation.
#[derive(Debug, Default)]
pub struct SuiteSummary {
    passed: usize,
    failed: usize,
    elapsed: Duration,
}

impl SuiteSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, verdict: &TestVerdict) {
        if verdict.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.elapsed += verdict.elapsed;
    }

    pub fn passed_count(&self) -> usize {
        self.passed
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    /// `true` when no test failed (exit code 0).
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn render(&self) -> String {
        let total_line = format!("Total time: {:.4e} seconds", self.elapsed.as_secs_f64());
        if self.failed > 0 {
            format!(
                "{total_line}\n{} tests failed.\n{} tests passed.",
                self.failed, self.passed
            )
        } else {
            format!("{total_line}\nAll {} tests passed.", self.passed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineDecision;

    fn verdict(passed: bool) -> TestVerdict {
        TestVerdict {
            test_name: "taylor_bar_cpu_np_1".to_string(),
            passed,
            run_ok: true,
            avg_runtime_s: 1.5,
            avg_peak_memory_mb: Some(100.0),
            baseline: BaselineDecision {
                runtime_s: 1.45,
                peak_memory_mb: Some(95.0),
                updated: false,
                established: true,
            },
            pct_difference: Some(3.45),
            results: Vec::new(),
            elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_verdict_line_colors() {
        let line = render_verdict_line(&verdict(true));
        assert!(line.contains("PASS:"));
        assert!(line.contains("\x1b[92m"));

        let line = render_verdict_line(&verdict(false));
        assert!(line.contains("FAIL:"));
        assert!(line.contains("\x1b[91m"));
    }

    #[test]
    fn test_diagnostics_include_percentage_difference() {
        let lines = render_diagnostics(&verdict(false));
        assert!(lines.iter().any(|l| l.contains("3.45%")));
    }

    #[test]
    fn test_suite_summary_counts_and_exit() {
        let mut summary = SuiteSummary::new();
        summary.record(&verdict(true));
        summary.record(&verdict(true));
        summary.record(&verdict(false));

        assert_eq!(summary.passed_count(), 2);
        assert_eq!(summary.failed_count(), 1);
        assert!(!summary.all_passed());
        assert!(summary.render().contains("1 tests failed."));
    }

    #[test]
    fn test_suite_summary_all_passed() {
        let mut summary = SuiteSummary::new();
        summary.record(&verdict(true));
        assert!(summary.all_passed());
        assert!(summary.render().contains("All 1 tests passed."));
    }
}
