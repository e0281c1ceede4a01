//! Persisted baseline history and gold-standard selection.
//!
//! One CSV table per (machine, executable, process-count) scope holds the
//! measurement history; at most one row per machine identity carries the
//! gold-standard flag and serves as the comparison baseline. The table is
//! append-only except for the gold-flag rewrite when a new gold standard
//! is elected. No locking: concurrent writers to the same table race on
//! the read-modify-write update, which is why scopes get their own files.

use crate::config::DecisionPolicy;
use crate::error::Result;
use crate::machine::MachineIdentity;
use chrono::Local;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// One historical measurement row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineRecord {
    #[serde(rename = "Date")]
    pub date: String,

    #[serde(rename = "Time")]
    pub time: String,

    #[serde(rename = "Average Runtime (s)")]
    pub avg_runtime_s: f64,

    /// Absent on rows recorded before memory monitoring existed.
    #[serde(rename = "Peak Memory (MB)")]
    pub peak_memory_mb: Option<f64>,

    #[serde(rename = "Executable Info")]
    pub executable_info: String,

    #[serde(rename = "System")]
    pub system: String,

    #[serde(rename = "Node")]
    pub node: String,

    #[serde(rename = "Processor")]
    pub processor: String,

    #[serde(rename = "Platform Gold Standard")]
    pub gold_standard: bool,
}

impl BaselineRecord {
    /// Build a row for a just-measured run, stamped with the current
    /// local date and time.
    pub fn measured(
        identity: &MachineIdentity,
        avg_runtime_s: f64,
        peak_memory_mb: Option<f64>,
        executable_info: impl Into<String>,
        gold_standard: bool,
    ) -> Self {
        let now = Local::now();
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            avg_runtime_s,
            peak_memory_mb,
            executable_info: executable_info.into(),
            system: identity.system.clone(),
            node: identity.node.clone(),
            processor: identity.processor.clone(),
            gold_standard,
        }
    }

    fn matches(&self, identity: &MachineIdentity) -> bool {
        self.node == identity.node
            && self.system == identity.system
            && self.processor == identity.processor
    }
}

/// Result of a gold-standard lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum GoldLookup {
    /// The established baseline for this machine.
    Found(BaselineRecord),

    /// No baseline exists yet; the caller must decide whether to elect
    /// one.
    NeedsDecision,
}

/// CSV-backed baseline table.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional per-scope table path:
    /// `runtime_<node>_<system>_<processor>_<exe>_np_<N>.csv`.
    pub fn scoped_path(
        dir: &Path,
        identity: &MachineIdentity,
        executable_stem: &str,
        num_procs: u32,
    ) -> PathBuf {
        dir.join(format!(
            "runtime_{}_{}_np_{}.csv",
            identity.slug(),
            executable_stem,
            num_procs
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All rows in table order. A missing file reads as an empty history.
    pub fn read_all(&self) -> Result<Vec<BaselineRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(&self.path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// The gold-standard row for `identity`, if one is established.
    ///
    /// More than one matching gold row is a data-integrity warning, not
    /// an error: the most recently appended row wins.
    pub fn read_gold(&self, identity: &MachineIdentity) -> Result<GoldLookup> {
        let rows = self.read_all()?;
        let matching: Vec<&BaselineRecord> = rows
            .iter()
            .filter(|row| row.gold_standard && row.matches(identity))
            .collect();

        match matching.as_slice() {
            [] => Ok(GoldLookup::NeedsDecision),
            [only] => Ok(GoldLookup::Found((*only).clone())),
            many => {
                warn!(
                    count = many.len(),
                    machine = %identity,
                    table = %self.path.display(),
                    "multiple gold standard rows found; using the last one"
                );
                Ok(GoldLookup::Found((*many[many.len() - 1]).clone()))
            }
        }
    }

    /// Append a row. A row carrying the gold flag first demotes every
    /// existing gold row for the same machine identity (whole-table
    /// read-modify-write); plain history rows are appended in place.
    pub fn append(&self, record: BaselineRecord) -> Result<()> {
        if record.gold_standard {
            let identity = MachineIdentity {
                node: record.node.clone(),
                system: record.system.clone(),
                processor: record.processor.clone(),
            };
            let mut rows = self.read_all()?;
            for row in rows.iter_mut() {
                if row.gold_standard && row.matches(&identity) {
                    row.gold_standard = false;
                }
            }
            rows.push(record);
            self.write_all(&rows)
        } else if self.path.exists() {
            let file = OpenOptions::new().append(true).open(&self.path)?;
            let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
            writer.serialize(record)?;
            writer.flush()?;
            Ok(())
        } else {
            self.write_all(&[record])
        }
    }

    fn write_all(&self, rows: &[BaselineRecord]) -> Result<()> {
        let mut writer = WriterBuilder::new().has_headers(true).from_path(&self.path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Baseline values a measured run is compared against.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineDecision {
    /// Reference average runtime in seconds (0.0 when newly elected).
    pub runtime_s: f64,

    /// Reference peak memory in MB, when the gold row recorded one.
    pub peak_memory_mb: Option<f64>,

    /// When `true`, the current run's averages become the new gold
    /// standard and the run is not compared.
    pub updated: bool,

    /// Whether an established gold row backs these values. `false` for a
    /// freshly elected or deferred baseline.
    pub established: bool,
}

impl BaselineDecision {
    fn elected() -> Self {
        Self {
            runtime_s: 0.0,
            peak_memory_mb: None,
            updated: true,
            established: false,
        }
    }

    fn deferred() -> Self {
        Self {
            runtime_s: 0.0,
            peak_memory_mb: None,
            updated: false,
            established: false,
        }
    }

    /// Placeholder for tests that never consult the baseline table.
    pub fn none() -> Self {
        Self::deferred()
    }
}

/// Resolve the baseline for `identity`, applying the decision policy when
/// none is established.
pub async fn resolve_baseline(
    store: &BaselineStore,
    identity: &MachineIdentity,
    policy: &DecisionPolicy,
) -> Result<BaselineDecision> {
    match store.read_gold(identity)? {
        GoldLookup::Found(record) => Ok(BaselineDecision {
            runtime_s: record.avg_runtime_s,
            peak_memory_mb: record.peak_memory_mb,
            updated: false,
            established: true,
        }),
        GoldLookup::NeedsDecision => {
            warn!(
                machine = %identity,
                table = %store.path().display(),
                "no gold standard baseline found for this machine"
            );
            Ok(ask_to_set_baseline(policy).await)
        }
    }
}

/// Ask whether to elect the current run as the new gold standard.
///
/// Non-interactive policy elects silently. Interactive policy prompts on
/// stdin with a bounded wait; no answer, an invalid answer, or a timeout
/// all defer deterministically, so an unattended harness keeps moving.
async fn ask_to_set_baseline(policy: &DecisionPolicy) -> BaselineDecision {
    if policy.non_interactive {
        info!("electing new gold standard baseline (non-interactive)");
        return BaselineDecision::elected();
    }

    println!("Would you like to set the baseline for the current system?");
    println!(
        "Enter \"yes\" or \"no\" (automatically selecting \"no\" in {} seconds):",
        policy.prompt_timeout.as_secs()
    );

    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    let set_baseline =
        match tokio::time::timeout(policy.prompt_timeout, reader.read_line(&mut line)).await {
            Ok(Ok(_)) => {
                let answer = line.trim().to_lowercase();
                if answer.starts_with('y') {
                    true
                } else {
                    if !answer.starts_with('n') {
                        println!("Invalid input. Please enter \"yes\" or \"no\".");
                    }
                    false
                }
            }
            _ => {
                println!("No input received, automatically selecting \"no\".");
                false
            }
        };

    if set_baseline {
        println!("Setting the baseline runtime.");
        BaselineDecision::elected()
    } else {
        println!("Not setting the baseline runtime.");
        BaselineDecision::deferred()
    }
}
