//! End-to-end tests driving real child processes through the harness.

use simgate_core::{
    ArtifactDiffCheck, BaselineStore, DecisionPolicy, LaunchConfig, MachineIdentity, MonitorConfig,
    TestConfig, TestRunner,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn direct_launch() -> LaunchConfig {
    LaunchConfig {
        launcher: None,
        num_procs: 1,
        timeout: Some(Duration::from_secs(30)),
    }
}

fn non_interactive() -> DecisionPolicy {
    DecisionPolicy {
        non_interactive: true,
        ..DecisionPolicy::default()
    }
}

fn shell_test(name: &str, dir: &Path, script: &str) -> TestConfig {
    let mut config = TestConfig::new(
        name,
        "sh",
        vec!["-c".to_string(), script.to_string()],
    );
    config.launch = direct_launch();
    config.decision = non_interactive();
    config.work_dir = dir.to_path_buf();
    config
}

fn diff_check(name: &str, dir: &Path, tool: &str, results: &Path) -> Box<ArtifactDiffCheck> {
    Box::new(ArtifactDiffCheck::new(
        name,
        tool,
        dir.join("compare.spec"),
        results,
        dir.join("gold.out"),
        vec![],
        dir,
    ))
}

/// Test: clean run, passing artifact check, fresh baseline elected.
#[tokio::test]
async fn test_successful_run_bootstraps_baseline() {
    let dir = TempDir::new().expect("tempdir");
    let results = dir.path().join("results.out");

    let config = shell_test(
        "bootstrap_test",
        dir.path(),
        &format!("echo data > {}", results.display()),
    );
    let store = BaselineStore::new(dir.path().join("runtime.csv"));
    let runner = TestRunner::new(config, store.clone())
        .with_check(diff_check("bootstrap_diff", dir.path(), "true", &results));

    let verdict = runner.execute().await.expect("execute");

    assert!(verdict.run_ok);
    assert!(verdict.passed, "bootstrapping run must pass unconditionally");
    assert!(verdict.baseline.updated);
    assert!(verdict.pct_difference.is_none(), "no comparison on bootstrap");

    // The measured averages became the gold standard.
    let rows = store.read_all().expect("read");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].gold_standard);
    assert!(rows[0].avg_runtime_s > 0.0);
}

/// Test: failed run produces FAIL and skips verification checks.
#[tokio::test]
async fn test_failed_run_skips_checks() {
    let dir = TempDir::new().expect("tempdir");
    let results = dir.path().join("results.out");
    std::fs::write(&results, "data").expect("write");

    let mut config = TestConfig::new("fail_test", "false", vec![]);
    config.launch = direct_launch();
    config.decision = non_interactive();
    config.work_dir = dir.path().to_path_buf();

    let store = BaselineStore::new(dir.path().join("runtime.csv"));
    let runner = TestRunner::new(config, store)
        .with_check(diff_check("unreached_diff", dir.path(), "true", &results));

    let verdict = runner.execute().await.expect("execute");

    assert!(!verdict.passed);
    assert!(!verdict.run_ok);
    assert_eq!(verdict.results.len(), 1, "only the run failure is recorded");
    assert_eq!(verdict.results[0].check_name, "run");
}

/// Test: one failing check does not stop the others; verdict is FAIL.
#[tokio::test]
async fn test_all_checks_execute_after_a_failure() {
    let dir = TempDir::new().expect("tempdir");
    let results = dir.path().join("results.out");

    let config = shell_test(
        "multi_check_test",
        dir.path(),
        &format!("echo data > {}", results.display()),
    );
    let store = BaselineStore::new(dir.path().join("runtime.csv"));
    let runner = TestRunner::new(config, store)
        .with_check(diff_check("first_diff", dir.path(), "false", &results))
        .with_check(diff_check("second_diff", dir.path(), "true", &results));

    let verdict = runner.execute().await.expect("execute");

    assert!(!verdict.passed);
    assert!(verdict.run_ok);
    let names: Vec<&str> = verdict
        .results
        .iter()
        .map(|result| result.check_name.as_str())
        .collect();
    assert!(names.contains(&"first_diff"));
    assert!(
        names.contains(&"second_diff"),
        "later checks must still execute"
    );
    assert_eq!(verdict.failed_results().count(), 1);
}

/// Test: second invocation compares against the bootstrapped baseline.
#[tokio::test]
async fn test_compare_against_established_baseline() {
    let dir = TempDir::new().expect("tempdir");
    let store = BaselineStore::new(dir.path().join("runtime.csv"));

    let mut config = TestConfig::new("compare_test", "true", vec![]);
    config.launch = direct_launch();
    config.decision = non_interactive();
    config.work_dir = dir.path().to_path_buf();
    config.monitor = MonitorConfig {
        enabled: false,
        ..MonitorConfig::default()
    };
    // Trivial runs jitter wildly in relative terms; the comparison
    // mechanics are what is under test here.
    config.time_tolerance_pct = 1_000_000.0;

    let first = TestRunner::new(config.clone(), store.clone());
    let verdict = first.execute().await.expect("execute");
    assert!(verdict.baseline.updated);

    let second = TestRunner::new(config, store);
    let verdict = second.execute().await.expect("execute");

    assert!(!verdict.baseline.updated);
    assert!(verdict.baseline.established);
    assert!(verdict.pct_difference.is_some(), "must compare this time");
    assert!(verdict.passed, "{:?}", verdict.results);
}

/// Test: repeated repetitions average their durations.
#[tokio::test]
async fn test_repetitions_are_averaged() {
    let dir = TempDir::new().expect("tempdir");
    let store = BaselineStore::new(dir.path().join("runtime.csv"));

    let mut config = TestConfig::new("reps_test", "true", vec![]);
    config.launch = direct_launch();
    config.decision = non_interactive();
    config.work_dir = dir.path().to_path_buf();
    config.repetitions = 3;

    let verdict = TestRunner::new(config, store)
        .execute()
        .await
        .expect("execute");

    assert!(verdict.passed);
    assert!(verdict.avg_runtime_s > 0.0);
    assert!(verdict.avg_runtime_s.is_finite());
}

/// Test: the memory monitor observes a real resident set.
#[tokio::test]
async fn test_memory_monitor_observes_peak() {
    let dir = TempDir::new().expect("tempdir");
    let store = BaselineStore::new(dir.path().join("runtime.csv"));

    let mut config = shell_test("memory_test", dir.path(), "sleep 0.3");
    config.monitor = MonitorConfig {
        enabled: true,
        sample_interval: Duration::from_millis(5),
    };

    let verdict = TestRunner::new(config, store)
        .execute()
        .await
        .expect("execute");

    assert!(verdict.passed);
    let peak = verdict.avg_peak_memory_mb.expect("monitoring was enabled");
    assert!(peak > 0.0, "a sleeping shell still has a resident set");
}

/// Test: forced baseline update keeps the single-gold invariant.
#[tokio::test]
async fn test_update_baseline_keeps_single_gold() {
    let dir = TempDir::new().expect("tempdir");
    let store = BaselineStore::new(dir.path().join("runtime.csv"));

    let mut config = TestConfig::new("gold_test", "true", vec![]);
    config.launch = direct_launch();
    config.decision = non_interactive();
    config.work_dir = dir.path().to_path_buf();
    config.update_baseline = true;

    let identity = MachineIdentity {
        node: "bench01".to_string(),
        system: "linux".to_string(),
        processor: "x86_64".to_string(),
    };

    for _ in 0..2 {
        let runner =
            TestRunner::new(config.clone(), store.clone()).with_identity(identity.clone());
        let verdict = runner.execute().await.expect("execute");
        assert!(verdict.passed);
    }

    let rows = store.read_all().expect("read");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows.iter().filter(|row| row.gold_standard).count(),
        1,
        "exactly one gold row may exist per machine"
    );
    assert!(rows.iter().all(|row| row.node == "bench01"));
}

/// Test: sequential executions archive distinct run logs.
#[tokio::test]
async fn test_sequential_runs_keep_distinct_logs() {
    let dir = TempDir::new().expect("tempdir");
    let store = BaselineStore::new(dir.path().join("runtime.csv"));

    let mut config = TestConfig::new("log_test", "true", vec![]);
    config.launch = direct_launch();
    config.decision = non_interactive();
    config.work_dir = dir.path().to_path_buf();

    for _ in 0..2 {
        TestRunner::new(config.clone(), store.clone())
            .execute()
            .await
            .expect("execute");
    }

    let archived: Vec<PathBuf> = std::fs::read_dir(dir.path())
        .expect("read_dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            name.starts_with("log_test_") && name.ends_with(".log")
        })
        .collect();

    assert_eq!(archived.len(), 2, "each run keeps its own archived log");
}

/// Test: stale results from a previous attempt are removed before the
/// run, so a check that depends on them reports the miss honestly.
#[tokio::test]
async fn test_stale_results_are_cleared_before_run() {
    let dir = TempDir::new().expect("tempdir");
    let results = dir.path().join("results.out");
    std::fs::write(&results, "leftover from last time").expect("write");

    // The run itself produces nothing, so after stale cleanup the diff
    // check must fail on a missing results file.
    let config = shell_test("stale_test", dir.path(), "exit 0");
    let store = BaselineStore::new(dir.path().join("runtime.csv"));
    let runner = TestRunner::new(config, store)
        .with_check(diff_check("stale_diff", dir.path(), "true", &results));

    let verdict = runner.execute().await.expect("execute");

    assert!(!verdict.passed);
    let failed: Vec<_> = verdict.failed_results().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].message.contains("missing"));
}
