//! Peak resident-memory monitoring for a process tree.
//!
//! While the target runs, a watcher task samples the resident set of the
//! root process and every live descendant at a fixed cadence and retains
//! the running maximum. The watcher runs concurrently with the exit wait
//! and is stopped through a watch-channel cancellation signal, so output
//! capture drains the pipes while sampling proceeds.

use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One process in a sampled snapshot: parent pid and resident bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSample {
    pub parent: Option<u32>,
    pub rss_bytes: u64,
}

/// Sum resident memory of `root` and all its live descendants.
///
/// Processes missing from the snapshot (exited between enumeration and
/// sampling) simply do not contribute.
pub fn aggregate_tree_rss(root: u32, snapshot: &HashMap<u32, ProcessSample>) -> u64 {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, sample) in snapshot {
        if let Some(parent) = sample.parent {
            children.entry(parent).or_default().push(pid);
        }
    }

    // Visited guard: pid reuse can produce a parent loop in a snapshot.
    let mut visited = std::collections::HashSet::new();
    let mut total = 0u64;
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        if !visited.insert(pid) {
            continue;
        }
        if let Some(sample) = snapshot.get(&pid) {
            total += sample.rss_bytes;
        }
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }
    total
}

fn snapshot_processes(sys: &System) -> HashMap<u32, ProcessSample> {
    sys.processes()
        .iter()
        .map(|(pid, proc_)| {
            (
                pid.as_u32(),
                ProcessSample {
                    parent: proc_.parent().map(|parent| parent.as_u32()),
                    rss_bytes: proc_.memory(),
                },
            )
        })
        .collect()
}

/// Samples peak aggregate resident memory of a process tree.
#[derive(Debug, Clone)]
pub struct MemoryMonitor {
    sample_interval: Duration,
}

impl MemoryMonitor {
    pub fn new(sample_interval: Duration) -> Self {
        Self { sample_interval }
    }

    /// Start watching `root_pid`. The task samples until `cancel` fires
    /// (or its sender is dropped) and resolves to the peak aggregate
    /// resident set in bytes.
    pub fn spawn(&self, root_pid: u32, mut cancel: watch::Receiver<bool>) -> JoinHandle<u64> {
        let sample_interval = self.sample_interval;
        tokio::spawn(async move {
            let refresh = ProcessRefreshKind::nothing().with_memory();
            let mut sys =
                System::new_with_specifics(RefreshKind::nothing().with_processes(refresh));
            let mut ticker = tokio::time::interval(sample_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut peak = 0u64;
            loop {
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = ticker.tick() => {
                        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);
                        let snapshot = snapshot_processes(&sys);
                        let total = aggregate_tree_rss(root_pid, &snapshot);
                        peak = peak.max(total);
                    }
                }
            }
            peak
        })
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}
