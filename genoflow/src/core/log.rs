//! Human-readable progress log entries.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::RunId;
use crate::utils::Timestamp;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    #[default]
    Info,
    /// Something recoverable went wrong.
    Warn,
    /// Something unrecoverable went wrong.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A log line as submitted by a writer, before sequencing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}

impl LogLine {
    /// Creates an info line.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    /// Creates a warning line.
    #[must_use]
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warn,
            message: message.into(),
        }
    }

    /// Creates an error line.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    /// Creates a debug line.
    #[must_use]
    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Debug,
            message: message.into(),
        }
    }
}

/// An immutable, sequenced log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Per-run sequence number, assigned at append time.
    pub sequence: u64,
    /// Owning run.
    pub run_id: RunId,
    /// Stage the line belongs to; `None` for run-level lines.
    pub stage: Option<usize>,
    /// When the entry was appended.
    pub timestamp: Timestamp,
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}
