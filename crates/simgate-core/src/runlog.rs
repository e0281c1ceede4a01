//! Per-run log lifecycle.
//!
//! A run appends to a fixed working file, then rotates it to an archived
//! name qualified with a timestamp once the run completes. Sequential runs
//! of the same test therefore never clobber each other's logs.

use crate::error::Result;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only log for one run, archived on completion.
#[derive(Debug)]
pub struct RunLog {
    /// Stem used for the archived name (test or check name).
    stem: String,

    /// Fixed working path while the run is in flight.
    working_path: PathBuf,
}

impl RunLog {
    /// Create a fresh log in `dir`, removing any stale working file from a
    /// previous attempt.
    pub fn create(dir: &Path, stem: &str) -> Result<Self> {
        let working_path = dir.join(format!("{stem}.running.log"));
        if working_path.exists() {
            std::fs::remove_file(&working_path)?;
        }
        Ok(Self {
            stem: stem.to_string(),
            working_path,
        })
    }

    /// Append a message to the working log.
    pub fn append(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.working_path)?;
        file.write_all(message.as_bytes())?;
        Ok(())
    }

    /// Append a labelled section, skipping empty bodies.
    pub fn append_section(&self, label: &str, body: &str) -> Result<()> {
        if body.is_empty() {
            return Ok(());
        }
        self.append(&format!("{label}:\n{body}\n"))
    }

    /// Rename the working log to its archived name and return that path.
    ///
    /// The archived name carries a second-resolution timestamp; if that
    /// name is already taken a numeric suffix is added until a free one is
    /// found.
    pub fn archive(self) -> Result<PathBuf> {
        let dir = self
            .working_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let mut archived = dir.join(format!("{}_{stamp}.log", self.stem));
        let mut attempt = 1u32;
        while archived.exists() {
            archived = dir.join(format!("{}_{stamp}_{attempt}.log", self.stem));
            attempt += 1;
        }
        // The working file may not exist if nothing was appended; archive an
        // empty log rather than failing the run.
        if !self.working_path.exists() {
            std::fs::File::create(&self.working_path)?;
        }
        std::fs::rename(&self.working_path, &archived)?;
        Ok(archived)
    }

    /// Path of the in-flight working log.
    pub fn working_path(&self) -> &Path {
        &self.working_path
    }
}
