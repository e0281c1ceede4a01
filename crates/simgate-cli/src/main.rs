//! simgate - verification gate for simulation executables
//!
//! ## Commands
//!
//! - `run`: execute one test of the target executable, with optional
//!   artifact diff and baseline comparison
//! - `regression`: discover `regression.yaml` suites and verify artifacts
//! - `performance`: discover `performance.yaml` suites and gate runtime
//!   and peak memory against per-machine baselines
//! - `clean-logs`: remove archived harness logs under the suite roots

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use simgate_core::{
    init_tracing, render_diagnostics, render_verdict_line, ArtifactDiffCheck, BaselineStore,
    DecisionPolicy, LaunchConfig, MachineIdentity, MemoryReference, MonitorConfig, SuiteSummary,
    TestConfig, TestRunner,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use walkdir::WalkDir;

const REGRESSION_SUITE_FILE: &str = "regression.yaml";
const PERFORMANCE_SUITE_FILE: &str = "performance.yaml";

#[derive(Parser)]
#[command(name = "simgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Regression and performance verification gate for simulation executables", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single test of the executable
    Run {
        /// Path to the executable under test
        executable: PathBuf,

        /// Arguments passed to the executable
        args: Vec<String>,

        /// Test name, used for logs and the baseline table
        #[arg(long, default_value = "test")]
        name: String,

        /// Number of processes for the launcher
        #[arg(long, default_value_t = 1)]
        np: u32,

        /// Number of repetitions to average over
        #[arg(short = 'n', long, default_value_t = 1)]
        runs: u32,

        /// Multi-process launcher program
        #[arg(long, default_value = "mpirun")]
        launcher: String,

        /// Run the executable directly, without a launcher
        #[arg(long)]
        no_launcher: bool,

        /// Kill the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Allowed runtime deviation from baseline, percent
        #[arg(long, default_value_t = 3.0)]
        time_tolerance: f64,

        /// Allowed peak-memory growth over baseline, percent
        #[arg(long, default_value_t = 3.0)]
        memory_tolerance: f64,

        /// Persist a history row to the baseline table
        #[arg(long)]
        csv: bool,

        /// Replace the gold standard with this run's averages
        #[arg(long)]
        update_baseline: bool,

        /// Elect a missing baseline without prompting
        #[arg(long)]
        no_ask: bool,

        /// Disable peak-memory monitoring
        #[arg(long)]
        no_monitor: bool,

        /// Directory for logs and the baseline table
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// Artifact comparator tool
        #[arg(long, default_value = "exodiff")]
        diff_tool: PathBuf,

        /// Comparison-specification file for the artifact diff
        #[arg(long)]
        diff_spec: Option<PathBuf>,

        /// Results file produced by the run
        #[arg(long)]
        diff_results: Option<PathBuf>,

        /// Gold reference file
        #[arg(long)]
        diff_gold: Option<PathBuf>,
    },

    /// Discover and run regression suites (regression.yaml)
    Regression {
        /// Directory roots to search recursively for suite files
        #[arg(short, long, num_args = 1.., default_value = ".")]
        dir: Vec<PathBuf>,

        /// Directory containing the build
        #[arg(long, default_value = "build")]
        build_dir: PathBuf,

        /// Name of the executable inside the build tree
        #[arg(long, default_value = "solver")]
        executable_name: String,

        /// Artifact comparator tool
        #[arg(long, default_value = "exodiff")]
        diff_tool: PathBuf,

        /// Only run CPU tests
        #[arg(long)]
        cpu: bool,

        /// Only run GPU tests
        #[arg(long)]
        gpu: bool,

        /// Only run CPU tests with this number of processors
        #[arg(long)]
        cpu_num_procs: Option<u32>,
    },

    /// Discover and run performance suites (performance.yaml)
    Performance {
        /// Directory roots to search recursively for suite files
        #[arg(short, long, num_args = 1.., default_value = ".")]
        dir: Vec<PathBuf>,

        /// Directory containing the build
        #[arg(long, default_value = "build")]
        build_dir: PathBuf,

        /// Name of the executable inside the build tree
        #[arg(long, default_value = "solver")]
        executable_name: String,

        /// Only run CPU tests
        #[arg(long)]
        cpu: bool,

        /// Only run GPU tests
        #[arg(long)]
        gpu: bool,

        /// Only run CPU tests with this number of processors
        #[arg(long)]
        cpu_num_procs: Option<u32>,

        /// Skip writing history rows to the baseline tables
        #[arg(long)]
        skip_csv: bool,

        /// Replace the gold standards with this invocation's averages
        #[arg(long)]
        update_baseline: bool,

        /// Elect missing baselines without prompting
        #[arg(long)]
        no_ask: bool,
    },

    /// Remove archived harness logs under the suite roots
    CleanLogs {
        /// Directory roots to search recursively for suite files
        #[arg(short, long, num_args = 1.., default_value = ".")]
        dir: Vec<PathBuf>,
    },
}

// ── suite definition schema ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegressionSuite {
    tests: Vec<RegressionEntry>,
}

#[derive(Debug, Deserialize)]
struct RegressionEntry {
    hardware: String,
    num_processors: u32,
    input_file: String,
    #[serde(default)]
    artifact_diff: Vec<ArtifactDiffEntry>,
    #[serde(default)]
    peak_memory_check: Option<PeakMemoryEntry>,
}

#[derive(Debug, Deserialize)]
struct ArtifactDiffEntry {
    compare_file: String,
    results_file: String,
    gold_file: String,
}

#[derive(Debug, Deserialize)]
struct PeakMemoryEntry {
    value: f64,
    percent_tolerance: f64,
}

#[derive(Debug, Deserialize)]
struct PerformanceSuite {
    tests: Vec<PerformanceEntry>,
}

#[derive(Debug, Deserialize)]
struct PerformanceEntry {
    hardware: String,
    num_processors: u32,
    input_file: String,
    num_runs: u32,
    runtime_tolerance_percent: f64,
    memory_tolerance_percent: f64,
}

// ── helpers ───────────────────────────────────────────────────────────────

/// Test name: directory + hardware + number of processors.
fn suite_test_name(dir: &Path, hardware: &str, num_procs: u32) -> String {
    let prefix = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "suite".to_string());
    format!("{prefix}_{hardware}_np_{num_procs}")
}

/// Per-hardware executable inside the build tree.
fn executable_for(build_dir: &Path, hardware: &str, executable_name: &str) -> PathBuf {
    if hardware == "gpu" {
        build_dir.join("Release_gpu").join(executable_name)
    } else {
        build_dir.join("Release").join(executable_name)
    }
}

/// Reason to skip a suite entry under the active filters, if any.
fn skip_reason(
    hardware: &str,
    num_procs: u32,
    cpu_only: bool,
    gpu_only: bool,
    cpu_num_procs: Option<u32>,
) -> Option<String> {
    if hardware == "gpu" && cpu_only {
        return Some("--cpu set".to_string());
    }
    if hardware == "cpu" && gpu_only {
        return Some("--gpu set".to_string());
    }
    if let Some(procs) = cpu_num_procs {
        if num_procs != procs {
            return Some(format!("requested only tests with {procs} processors"));
        }
    }
    None
}

/// Recursively find suite files named `file_name` under the roots.
fn discover_suites(roots: &[PathBuf], file_name: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && entry.file_name() == file_name {
                found.push(entry.path().to_path_buf());
            }
        }
    }
    found.sort();
    found
}

fn report_verdict(verdict: &simgate_core::TestVerdict) {
    println!("{}", render_verdict_line(verdict));
    for line in render_diagnostics(verdict) {
        println!("  {line}");
    }
}

// ── commands ──────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    executable: PathBuf,
    args: Vec<String>,
    name: String,
    np: u32,
    runs: u32,
    launcher: String,
    no_launcher: bool,
    timeout_secs: Option<u64>,
    time_tolerance: f64,
    memory_tolerance: f64,
    csv: bool,
    update_baseline: bool,
    no_ask: bool,
    no_monitor: bool,
    work_dir: PathBuf,
    diff_tool: PathBuf,
    diff_spec: Option<PathBuf>,
    diff_results: Option<PathBuf>,
    diff_gold: Option<PathBuf>,
) -> Result<()> {
    let mut config = TestConfig::new(name.clone(), executable.clone(), args);
    config.repetitions = runs;
    config.time_tolerance_pct = time_tolerance;
    config.memory_tolerance_pct = memory_tolerance;
    config.update_baseline = update_baseline;
    config.record_history = csv;
    config.work_dir = work_dir.clone();
    config.launch = LaunchConfig {
        launcher: if no_launcher { None } else { Some(launcher) },
        num_procs: np,
        timeout: timeout_secs.map(Duration::from_secs),
    };
    config.monitor = MonitorConfig {
        enabled: !no_monitor,
        ..MonitorConfig::default()
    };
    config.decision = DecisionPolicy {
        non_interactive: no_ask,
        ..DecisionPolicy::default()
    };

    let identity = MachineIdentity::current();
    let executable_stem = executable
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "executable".to_string());
    let store = BaselineStore::new(BaselineStore::scoped_path(
        &work_dir,
        &identity,
        &executable_stem,
        np,
    ));

    let mut runner = TestRunner::new(config, store);
    if let (Some(spec), Some(results), Some(gold)) = (diff_spec, diff_results, diff_gold) {
        runner = runner.with_check(Box::new(ArtifactDiffCheck::new(
            format!("{name}_artifact_diff"),
            diff_tool,
            spec,
            results,
            gold,
            vec![],
            &work_dir,
        )));
    }

    let verdict = runner.execute().await.context("test execution failed")?;
    report_verdict(&verdict);

    if verdict.passed {
        Ok(())
    } else {
        bail!("test '{}' failed", verdict.test_name)
    }
}

async fn cmd_regression(
    dirs: Vec<PathBuf>,
    build_dir: PathBuf,
    executable_name: String,
    diff_tool: PathBuf,
    cpu: bool,
    gpu: bool,
    cpu_num_procs: Option<u32>,
) -> Result<()> {
    let mut summary = SuiteSummary::new();

    for suite_path in discover_suites(&dirs, REGRESSION_SUITE_FILE) {
        let suite_dir = suite_path
            .parent()
            .context("suite file has no parent directory")?
            .to_path_buf();
        println!("-----------------------------------");
        println!("Running tests in {}", suite_dir.display());

        let text = std::fs::read_to_string(&suite_path)
            .with_context(|| format!("reading {}", suite_path.display()))?;
        let suite: RegressionSuite = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", suite_path.display()))?;

        for entry in &suite.tests {
            if let Some(reason) =
                skip_reason(&entry.hardware, entry.num_processors, cpu, gpu, cpu_num_procs)
            {
                println!(
                    "  Skipping test {}_{}. {reason}",
                    entry.hardware, entry.num_processors
                );
                continue;
            }
            println!("  Running test {}_{}", entry.hardware, entry.num_processors);

            let name = suite_test_name(&suite_dir, &entry.hardware, entry.num_processors);
            let mut config = TestConfig::new(
                name.clone(),
                executable_for(&build_dir, &entry.hardware, &executable_name),
                vec![entry.input_file.clone()],
            );
            config.launch.num_procs = entry.num_processors;
            config.work_dir = suite_dir.clone();
            config.compare_baseline = false;
            config.monitor.enabled = entry.peak_memory_check.is_some();
            config.memory_reference = entry.peak_memory_check.as_ref().map(|check| {
                MemoryReference {
                    value_mb: check.value,
                    tolerance_pct: check.percent_tolerance,
                }
            });

            // Regression tests skip baseline bookkeeping; the store is
            // never touched.
            let store = BaselineStore::new(suite_dir.join("runtime.csv"));
            let mut runner = TestRunner::new(config, store);
            for (index, diff) in entry.artifact_diff.iter().enumerate() {
                runner = runner.with_check(Box::new(ArtifactDiffCheck::new(
                    format!("{name}_artifact_diff_{index}"),
                    diff_tool.clone(),
                    suite_dir.join(&diff.compare_file),
                    suite_dir.join(&diff.results_file),
                    suite_dir.join(&diff.gold_file),
                    vec![],
                    &suite_dir,
                )));
            }

            let verdict = runner.execute().await.context("test execution failed")?;
            report_verdict(&verdict);
            summary.record(&verdict);
        }
        println!("-----------------------------------\n");
    }

    println!("{}", summary.render());
    if summary.all_passed() {
        Ok(())
    } else {
        bail!("{} regression tests failed", summary.failed_count())
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_performance(
    dirs: Vec<PathBuf>,
    build_dir: PathBuf,
    executable_name: String,
    cpu: bool,
    gpu: bool,
    cpu_num_procs: Option<u32>,
    skip_csv: bool,
    update_baseline: bool,
    no_ask: bool,
) -> Result<()> {
    let identity = MachineIdentity::current();
    let mut summary = SuiteSummary::new();

    for suite_path in discover_suites(&dirs, PERFORMANCE_SUITE_FILE) {
        let suite_dir = suite_path
            .parent()
            .context("suite file has no parent directory")?
            .to_path_buf();
        println!("-----------------------------------");
        println!("Running tests in {}", suite_dir.display());

        let text = std::fs::read_to_string(&suite_path)
            .with_context(|| format!("reading {}", suite_path.display()))?;
        let suite: PerformanceSuite = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", suite_path.display()))?;

        for entry in &suite.tests {
            if let Some(reason) =
                skip_reason(&entry.hardware, entry.num_processors, cpu, gpu, cpu_num_procs)
            {
                println!(
                    "  Skipping test {}_{}. {reason}",
                    entry.hardware, entry.num_processors
                );
                continue;
            }
            println!("  Running test {}_{}", entry.hardware, entry.num_processors);

            let name = suite_test_name(&suite_dir, &entry.hardware, entry.num_processors);
            let mut config = TestConfig::new(
                name,
                executable_for(&build_dir, &entry.hardware, &executable_name),
                vec![entry.input_file.clone()],
            );
            config.repetitions = entry.num_runs;
            config.time_tolerance_pct = entry.runtime_tolerance_percent;
            config.memory_tolerance_pct = entry.memory_tolerance_percent;
            config.launch.num_procs = entry.num_processors;
            config.work_dir = suite_dir.clone();
            config.update_baseline = update_baseline;
            config.record_history = !skip_csv;
            config.decision = DecisionPolicy {
                non_interactive: no_ask,
                ..DecisionPolicy::default()
            };

            let store = BaselineStore::new(BaselineStore::scoped_path(
                &suite_dir,
                &identity,
                &executable_name,
                entry.num_processors,
            ));

            let verdict = TestRunner::new(config, store)
                .execute()
                .await
                .context("test execution failed")?;
            report_verdict(&verdict);
            summary.record(&verdict);
        }
        println!("-----------------------------------\n");
    }

    println!("{}", summary.render());
    if summary.all_passed() {
        Ok(())
    } else {
        bail!("{} performance tests failed", summary.failed_count())
    }
}

fn cmd_clean_logs(dirs: Vec<PathBuf>) -> Result<()> {
    for suite_file in [REGRESSION_SUITE_FILE, PERFORMANCE_SUITE_FILE] {
        for suite_path in discover_suites(&dirs, suite_file) {
            let Some(suite_dir) = suite_path.parent() else {
                continue;
            };
            println!("Cleaning logs in {}", suite_dir.display());
            for entry in std::fs::read_dir(suite_dir)?.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "log") {
                    info!(path = %path.display(), "removing archived log");
                    std::fs::remove_file(&path)?;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            executable,
            args,
            name,
            np,
            runs,
            launcher,
            no_launcher,
            timeout_secs,
            time_tolerance,
            memory_tolerance,
            csv,
            update_baseline,
            no_ask,
            no_monitor,
            work_dir,
            diff_tool,
            diff_spec,
            diff_results,
            diff_gold,
        } => {
            cmd_run(
                executable,
                args,
                name,
                np,
                runs,
                launcher,
                no_launcher,
                timeout_secs,
                time_tolerance,
                memory_tolerance,
                csv,
                update_baseline,
                no_ask,
                no_monitor,
                work_dir,
                diff_tool,
                diff_spec,
                diff_results,
                diff_gold,
            )
            .await
        }
        Commands::Regression {
            dir,
            build_dir,
            executable_name,
            diff_tool,
            cpu,
            gpu,
            cpu_num_procs,
        } => {
            cmd_regression(
                dir,
                build_dir,
                executable_name,
                diff_tool,
                cpu,
                gpu,
                cpu_num_procs,
            )
            .await
        }
        Commands::Performance {
            dir,
            build_dir,
            executable_name,
            cpu,
            gpu,
            cpu_num_procs,
            skip_csv,
            update_baseline,
            no_ask,
        } => {
            cmd_performance(
                dir,
                build_dir,
                executable_name,
                cpu,
                gpu,
                cpu_num_procs,
                skip_csv,
                update_baseline,
                no_ask,
            )
            .await
        }
        Commands::CleanLogs { dir } => cmd_clean_logs(dir),
    }
}
