//! Centralized error types for tempbox.

use std::path::PathBuf;
use thiserror::Error;

/// A single item that a bulk operation could not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Id of the message (or record) that failed.
    pub id: String,
    /// Human-readable reason.
    pub reason: String,
}

/// All errors produced by the tempbox library.
#[derive(Error, Debug)]
pub enum TempboxError {
    /// The storage engine could not be opened, even after one retry.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A persisted message table failed header or checksum validation.
    #[error("Corrupt message table '{key}': {reason}")]
    CorruptTable { key: String, reason: String },

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A remote message lacked a required field. Never surfaced to callers;
    /// the reconciler skips such items.
    #[error("Malformed remote message: {0}")]
    MalformedRemoteMessage(String),

    /// A provider request exceeded the configured timeout.
    #[error("Request timed out after {0} ms")]
    NetworkTimeout(u64),

    /// A provider request failed (transport, status code, or payload).
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Caller-supplied input was rejected.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The referenced account does not exist in the registry.
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    /// The referenced message does not exist.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// A backup document was rejected.
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// A bulk operation applied some items and failed on others.
    #[error("{applied} item(s) applied, {} failed", failed.len())]
    PartialFailure {
        applied: usize,
        failed: Vec<ItemFailure>,
    },
}

/// Convenience alias for `Result<T, TempboxError>`.
pub type Result<T> = std::result::Result<T, TempboxError>;

impl TempboxError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for TempboxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for TempboxError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Outcome of a bulk operation applied item by item.
///
/// Items already applied are never rolled back when a later item fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of items applied.
    pub applied: usize,
    /// Items that failed, in request order.
    pub failed: Vec<ItemFailure>,
}

impl BatchReport {
    /// Record one applied item.
    pub fn applied(&mut self) {
        self.applied += 1;
    }

    /// Record one failed item.
    pub fn failed(&mut self, id: impl Into<String>, err: &TempboxError) {
        self.failed.push(ItemFailure {
            id: id.into(),
            reason: err.to_string(),
        });
    }

    /// True when every requested item was applied.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn the report into a single aggregate outcome.
    pub fn into_result(self) -> Result<usize> {
        if self.failed.is_empty() {
            Ok(self.applied)
        } else {
            Err(TempboxError::PartialFailure {
                applied: self.applied,
                failed: self.failed,
            })
        }
    }
}
