//! Harness-level error taxonomy.

use std::path::PathBuf;

/// Errors produced by the verification harness.
///
/// Launch and tolerance failures are normally recovered at the smallest
/// enclosing unit (one run, one check) and surface as failed results with
/// diagnostics; these variants exist for the paths where a caller needs
/// the structured cause.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("executable not found: {}", path.display())]
    LaunchFailure { path: PathBuf },

    #[error("process exceeded timeout of {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("command exited with code {code}: {command}")]
    NonZeroExit { command: String, code: i32 },

    #[error("expected artifact missing: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::LaunchFailure {
            path: PathBuf::from("/opt/solver/bin/solver"),
        };
        assert!(err.to_string().contains("executable not found"));

        let err = HarnessError::Timeout {
            command: "solver input.yaml".to_string(),
            timeout_secs: 600,
        };
        assert!(err.to_string().contains("600"));

        let err = HarnessError::NonZeroExit {
            command: "artifact-diff -f compare.spec".to_string(),
            code: 2,
        };
        assert!(err.to_string().contains("code 2"));
    }
}
