// SPDX-License-Identifier: Apache-2.0

//! Append-only JSON-lines audit log for a topology, grounded on
//! `audit.py::EventAuditor`. Writes are best-effort: a failure to write an
//! audit line is logged and swallowed rather than propagated, since the
//! audit log is diagnostic, not authoritative state.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::audit::AuditEvent;
use crate::domain::errors::BlockadeError;

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(data_dir: impl AsRef<Path>, blockade_id: &str) -> Self {
        let path = data_dir
            .as_ref()
            .join(".blockade")
            .join(format!("audit-{blockade_id}.jsonl"));
        AuditLog { path }
    }

    /// Append one event. Errors are logged, not returned: a topology
    /// operation should never fail just because its audit trail couldn't
    /// be written.
    pub fn log(&self, event: &AuditEvent) {
        if let Err(e) = self.try_log(event) {
            warn!(error = %e, "failed to write audit log entry");
        }
    }

    fn try_log(&self, event: &AuditEvent) -> Result<(), BlockadeError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| BlockadeError::ConfigIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| BlockadeError::ConfigIo { path: self.path.clone(), source })?;
        let line = serde_json::to_string(event).map_err(|e| BlockadeError::ConfigError(e.to_string()))?;
        writeln!(file, "{line}").map_err(|source| BlockadeError::ConfigIo { path: self.path.clone(), source })
    }

    pub fn read_all(&self) -> Result<Vec<AuditEvent>, BlockadeError> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)
            .map_err(|source| BlockadeError::ConfigIo { path: self.path.clone(), source })?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| BlockadeError::ConfigIo { path: self.path.clone(), source })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent =
                serde_json::from_str(&line).map_err(|e| BlockadeError::InconsistentState(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    pub fn clean(&self) -> Result<(), BlockadeError> {
        if self.path.is_file() {
            std::fs::remove_file(&self.path)
                .map_err(|source| BlockadeError::ConfigIo { path: self.path.clone(), source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn log_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path(), "test");
        log.log(&AuditEvent::ok(Utc::now(), "up", vec!["web".to_string()]));
        log.log(&AuditEvent::error(Utc::now(), "kill", vec!["db".to_string()], "boom"));

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "up");
        assert_eq!(events[1].message.as_deref(), Some("boom"));
    }

    #[test]
    fn clean_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path(), "test");
        log.log(&AuditEvent::ok(Utc::now(), "up", vec![]));
        log.clean().unwrap();
        assert!(log.read_all().unwrap().is_empty());
    }
}
