//! Machine identity fingerprint.
//!
//! Baselines are only comparable on the hardware that produced them, so
//! every stored row carries the node name, OS, and processor architecture
//! of the machine it was measured on.

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Identity of the machine a measurement was taken on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineIdentity {
    /// Network node name (hostname).
    pub node: String,

    /// Operating system family (e.g. "linux", "macos").
    pub system: String,

    /// Processor architecture (e.g. "x86_64", "aarch64").
    pub processor: String,
}

impl MachineIdentity {
    /// Fingerprint the current machine.
    pub fn current() -> Self {
        Self {
            node: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            system: std::env::consts::OS.to_string(),
            processor: std::env::consts::ARCH.to_string(),
        }
    }

    /// Identity fields joined for use in file names.
    pub fn slug(&self) -> String {
        format!("{}_{}_{}", self.node, self.system, self.processor)
    }
}

impl std::fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.node, self.system, self.processor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_populated() {
        let id = MachineIdentity::current();
        assert!(!id.system.is_empty());
        assert!(!id.processor.is_empty());
    }

    #[test]
    fn test_slug_joins_fields() {
        let id = MachineIdentity {
            node: "bench01".to_string(),
            system: "linux".to_string(),
            processor: "x86_64".to_string(),
        };
        assert_eq!(id.slug(), "bench01_linux_x86_64");
    }
}
