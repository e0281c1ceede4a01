//! Child-process execution with full output capture.
//!
//! Spawns `[launch-prefix] <executable> <args...>`, drains stdout/stderr
//! concurrently with the exit wait, optionally samples peak resident
//! memory of the process tree, and converts every spawn-time fault into a
//! failed record instead of propagating — a misbehaving target must never
//! take the harness down with it.

use crate::config::{LaunchConfig, MonitorConfig};
use crate::error::HarnessError;
use crate::memory::MemoryMonitor;
use crate::runlog::RunLog;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{info, warn};

/// Sentinel exit code for a launch target that could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Sentinel exit code for spawn faults, kills, and timeouts.
pub const EXIT_FAULT: i32 = -1;

/// Outcome of one invocation of the target executable.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// Full command line, for reproducibility in diagnostics.
    pub command: String,

    /// Exit code (0 = success; sentinel values for faults).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration of the run.
    pub duration: Duration,

    /// Peak aggregate resident set of the process tree, in bytes.
    /// Zero when monitoring is disabled.
    pub peak_rss_bytes: u64,
}

impl RunRecord {
    /// Whether the run exited cleanly.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    fn fault(command: String, exit_code: i32, stderr: String, duration: Duration) -> Self {
        Self {
            command,
            exit_code,
            stdout: String::new(),
            stderr,
            duration,
            peak_rss_bytes: 0,
        }
    }
}

/// Runs the executable under test (or an external tool) as a child
/// process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    launch: LaunchConfig,
    monitor: MonitorConfig,
    current_dir: Option<std::path::PathBuf>,
}

impl ProcessRunner {
    pub fn new(launch: LaunchConfig, monitor: MonitorConfig) -> Self {
        Self {
            launch,
            monitor,
            current_dir: None,
        }
    }

    /// Run the child in `dir` instead of the harness working directory.
    pub fn with_current_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Runner for external tools: no launch prefix, no monitoring.
    pub fn bare() -> Self {
        Self {
            launch: LaunchConfig {
                launcher: None,
                num_procs: 1,
                timeout: None,
            },
            monitor: MonitorConfig {
                enabled: false,
                ..MonitorConfig::default()
            },
            current_dir: None,
        }
    }

    /// Execute `executable` with `args`, appending a transcript to `log`.
    ///
    /// Never returns an error for target misbehavior: launch failures,
    /// non-zero exits, and timeouts all come back as a `RunRecord` with a
    /// non-zero exit code.
    pub async fn run(&self, executable: &Path, args: &[String], log: &RunLog) -> RunRecord {
        let mut argv = self.launch.launch_prefix();
        argv.push(executable.to_string_lossy().into_owned());
        argv.extend(args.iter().cloned());
        let command = argv.join(" ");

        let start = Instant::now();
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let err = HarnessError::LaunchFailure {
                    path: argv[0].clone().into(),
                };
                warn!(command = %command, "{err}");
                let _ = log.append(&format!("{err}\n"));
                return RunRecord::fault(command, EXIT_NOT_FOUND, err.to_string(), start.elapsed());
            }
            Err(e) => {
                let message = format!("An error occurred: {e}");
                warn!(command = %command, "{message}");
                let _ = log.append(&format!("{message}\n"));
                return RunRecord::fault(command, EXIT_FAULT, message, start.elapsed());
            }
        };

        // Drain the pipes concurrently with the wait so a chatty target
        // cannot deadlock against full output buffers.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        // Memory watcher runs until the wait completes.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let watcher = match (self.monitor.enabled, child.id()) {
            (true, Some(pid)) => {
                Some(MemoryMonitor::new(self.monitor.sample_interval).spawn(pid, cancel_rx))
            }
            _ => None,
        };

        let mut timed_out = false;
        let status = match self.launch.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    timed_out = true;
                    let _ = child.kill().await;
                    child.wait().await
                }
            },
            None => child.wait().await,
        };

        let _ = cancel_tx.send(true);
        let duration = start.elapsed();
        let peak_rss_bytes = match watcher {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        let exit_code = if timed_out {
            let limit_secs = self.launch.timeout.map(|t| t.as_secs()).unwrap_or(0);
            let err = HarnessError::Timeout {
                command: command.clone(),
                timeout_secs: limit_secs,
            };
            warn!(command = %command, timeout_secs = limit_secs, "run timed out");
            let _ = log.append(&format!("{err}\nFAILED\n"));
            EXIT_FAULT
        } else {
            match status {
                Ok(status) => {
                    let code = status.code().unwrap_or(EXIT_FAULT);
                    if code == 0 {
                        let _ = log.append("Executable ran successfully.\nPASSED\n");
                    } else {
                        let err = HarnessError::NonZeroExit {
                            command: command.clone(),
                            code,
                        };
                        warn!(command = %command, exit_code = code, "run failed");
                        let _ = log.append(&format!("{err}\nFAILED\n"));
                    }
                    code
                }
                Err(e) => {
                    let message = format!("An error occurred: {e}\nCommand: {command}\nFAILED\n");
                    warn!(command = %command, "{message}");
                    let _ = log.append(&message);
                    EXIT_FAULT
                }
            }
        };

        let _ = log.append_section("Standard output", &stdout);
        let _ = log.append_section("Standard error", &stderr);

        info!(
            command = %command,
            exit_code,
            duration_ms = duration.as_millis() as u64,
            peak_rss_bytes,
            "run complete"
        );

        RunRecord {
            command,
            exit_code,
            stdout,
            stderr,
            duration,
            peak_rss_bytes,
        }
    }
}

/// Query the executable's `--version` string, for recording alongside
/// baseline rows. Faults collapse to `None`; version capture must never
/// fail a test.
pub async fn query_version(executable: &Path) -> Option<String> {
    let output = Command::new(executable)
        .arg("--version")
        .output()
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bare_runner() -> ProcessRunner {
        ProcessRunner::bare()
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let dir = TempDir::new().expect("tempdir");
        let log = RunLog::create(dir.path(), "echo").expect("log");
        let record = bare_runner()
            .run(Path::new("echo"), &["hello".to_string()], &log)
            .await;
        assert!(record.passed());
        assert_eq!(record.exit_code, 0);
        assert!(record.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_nonzero_exit() {
        let dir = TempDir::new().expect("tempdir");
        let log = RunLog::create(dir.path(), "false").expect("log");
        let record = bare_runner().run(Path::new("false"), &[], &log).await;
        assert!(!record.passed());
        assert_ne!(record.exit_code, 0);
    }

    #[tokio::test]
    async fn test_missing_executable_is_sentinel_not_error() {
        let dir = TempDir::new().expect("tempdir");
        let log = RunLog::create(dir.path(), "missing").expect("log");
        let record = bare_runner()
            .run(Path::new("/nonexistent-binary-that-does-not-exist"), &[], &log)
            .await;
        assert_eq!(record.exit_code, EXIT_NOT_FOUND);
        assert!(record.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_fails() {
        let dir = TempDir::new().expect("tempdir");
        let log = RunLog::create(dir.path(), "hang").expect("log");
        let runner = ProcessRunner::new(
            LaunchConfig {
                launcher: None,
                num_procs: 1,
                timeout: Some(Duration::from_millis(100)),
            },
            MonitorConfig {
                enabled: false,
                ..MonitorConfig::default()
            },
        );
        let record = runner
            .run(Path::new("sleep"), &["5".to_string()], &log)
            .await;
        assert_eq!(record.exit_code, EXIT_FAULT);
        assert!(record.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_launch_prefix_is_prepended() {
        let dir = TempDir::new().expect("tempdir");
        let log = RunLog::create(dir.path(), "prefix").expect("log");
        let runner = ProcessRunner::new(
            LaunchConfig {
                launcher: Some("mpirun".to_string()),
                num_procs: 4,
                timeout: None,
            },
            MonitorConfig {
                enabled: false,
                ..MonitorConfig::default()
            },
        );
        // The launcher may not be installed; the command line is still
        // assembled with the prefix and the run degrades to a sentinel.
        let record = runner
            .run(Path::new("echo"), &["ok".to_string()], &log)
            .await;
        assert!(record.command.starts_with("mpirun -n 4 echo"));
    }

    #[tokio::test]
    async fn test_query_version_missing_binary() {
        assert!(query_version(Path::new("/no/such/binary")).await.is_none());
    }
}
