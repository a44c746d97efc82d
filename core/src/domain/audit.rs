// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the append-only audit log for a topology: every
/// state-changing operation, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub status: AuditStatus,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Ok,
    Error,
}

impl AuditEvent {
    pub fn ok(timestamp: DateTime<Utc>, event: impl Into<String>, targets: Vec<String>) -> Self {
        AuditEvent {
            timestamp,
            event: event.into(),
            status: AuditStatus::Ok,
            targets,
            message: None,
        }
    }

    pub fn error(
        timestamp: DateTime<Utc>,
        event: impl Into<String>,
        targets: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        AuditEvent {
            timestamp,
            event: event.into(),
            status: AuditStatus::Error,
            targets,
            message: Some(message.into()),
        }
    }
}
