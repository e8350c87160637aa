use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

use crate::error::IndexError;
use crate::models::status::{Phase, StatusRecord};

/// Crash-safe progress reporting to a side file. Entirely advisory: every
/// write failure is logged and swallowed so indexing never blocks on it.
/// No status file means idle.
pub struct StatusReporter {
    path: PathBuf,
}

impl StatusReporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn read(&self) -> Option<StatusRecord> {
        let raw = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Overwrite the record for `phase`. `started_at` is carried over from
    /// an existing record of the same phase so duration stays correct
    /// across updates within one operation.
    pub fn update(&self, phase: Phase, current: i64, total: i64) {
        let now = Utc::now();
        let started_at = match self.read() {
            Some(prev) if prev.status == phase => prev.started_at,
            _ => now,
        };
        let record = StatusRecord {
            status: phase,
            started_at,
            updated_at: now,
            total,
            current,
            progress: StatusRecord::progress_of(current, total),
        };
        if let Err(e) = self.write_atomic(&record) {
            warn!(path = %self.path.display(), "status write failed: {e}");
        }
    }

    /// Remove the record at successful completion.
    pub fn clear(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "status clear failed: {e}");
            }
        }
    }

    // Write to a sibling temp file, fsync, then rename over the target so a
    // reader can never observe a partially written record.
    fn write_atomic(&self, record: &StatusRecord) -> Result<(), IndexError> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string(record)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
