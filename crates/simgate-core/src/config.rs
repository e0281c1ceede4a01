//! Harness configuration.
//!
//! All knobs are carried in explicit config structs threaded through
//! constructors; nothing reads ambient global state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for launching the executable under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchConfig {
    /// Multi-process launcher program (e.g. `mpirun`). `None` runs the
    /// executable directly.
    pub launcher: Option<String>,

    /// Number of processes requested from the launcher.
    pub num_procs: u32,

    /// Wall-clock timeout for one run. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            launcher: Some("mpirun".to_string()),
            num_procs: 1,
            timeout: None,
        }
    }
}

impl LaunchConfig {
    /// Launch-prefix argv, prepended to the executable command line.
    pub fn launch_prefix(&self) -> Vec<String> {
        match &self.launcher {
            Some(launcher) => vec![
                launcher.clone(),
                "-n".to_string(),
                self.num_procs.to_string(),
            ],
            None => Vec::new(),
        }
    }
}

/// Configuration for resident-memory monitoring of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Whether to sample memory at all.
    pub enabled: bool,

    /// Sampling cadence. Approximate under scheduler jitter; only the
    /// retained maximum matters.
    pub sample_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval: Duration::from_millis(10),
        }
    }
}

/// Static peak-memory reference from a test definition, checked against
/// the observed peak independently of the baseline table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryReference {
    /// Reference peak memory in MB.
    pub value_mb: f64,

    /// Allowed growth over the reference, in percent.
    pub tolerance_pct: f64,
}

/// How to resolve a missing baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionPolicy {
    /// When `true`, a missing baseline silently elects the current run as
    /// the new gold standard instead of prompting.
    pub non_interactive: bool,

    /// Bounded wait for the interactive yes/no prompt.
    pub prompt_timeout: Duration,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            non_interactive: false,
            prompt_timeout: Duration::from_secs(10),
        }
    }
}

/// Full configuration for one verification test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestConfig {
    /// Test name, used for log stems and reporting.
    pub name: String,

    /// Path to the executable under test.
    pub executable: PathBuf,

    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Number of repetitions to average over.
    pub repetitions: u32,

    /// Allowed runtime deviation from baseline, in percent (symmetric).
    pub time_tolerance_pct: f64,

    /// Allowed peak-memory growth over baseline, in percent (upper bound
    /// only).
    pub memory_tolerance_pct: f64,

    /// Directory where run logs and baseline tables live.
    pub work_dir: PathBuf,

    /// Consult the baseline table at all. Regression-style tests verify
    /// artifacts only and skip baseline bookkeeping.
    pub compare_baseline: bool,

    /// Force the measured averages to replace the gold standard.
    pub update_baseline: bool,

    /// Persist a history row even when the baseline is unchanged.
    pub record_history: bool,

    /// Optional fixed peak-memory bound from the test definition.
    pub memory_reference: Option<MemoryReference>,

    pub launch: LaunchConfig,
    pub monitor: MonitorConfig,
    pub decision: DecisionPolicy,
}

impl TestConfig {
    /// Minimal config for a single run of `executable` with `args`.
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args,
            repetitions: 1,
            time_tolerance_pct: 3.0,
            memory_tolerance_pct: 3.0,
            work_dir: PathBuf::from("."),
            compare_baseline: true,
            update_baseline: false,
            record_history: false,
            memory_reference: None,
            launch: LaunchConfig::default(),
            monitor: MonitorConfig::default(),
            decision: DecisionPolicy::default(),
        }
    }
}
