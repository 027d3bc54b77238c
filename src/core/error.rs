// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core error types for roborec.
//!
//! Provides the error taxonomy of the recording subsystem:
//! - Fatal initialization failures (first file cannot be opened)
//! - Local inconsistencies (schema missing for a topic)
//! - Size-budget overflows, per file and per disk
//! - Per-write codec failures

use std::fmt;

/// Errors raised by the recording subsystem.
#[derive(Debug, Clone)]
pub enum RecorderError {
    /// Fatal failure while setting up the recorder or opening a file.
    Initialization {
        /// What was being initialized
        context: String,
        /// Error message
        message: String,
    },

    /// Local inconsistency; the offending message or channel is skipped.
    Inconsistency {
        /// Where the inconsistency was detected
        context: String,
        /// Error message
        message: String,
    },

    /// A reservation would overflow the current file's byte budget.
    ///
    /// Recoverable inside the writer: handled by rolling over to a new
    /// file sized to fit the pending item.
    FullFile {
        /// Size of the item whose reservation overflowed
        data_size_to_write: u64,
    },

    /// The cumulative disk budget is exhausted; no new file can be opened.
    FullDisk {
        /// Error message
        message: String,
    },

    /// Per-write failure from the underlying MCAP serialization.
    Codec {
        /// Which write failed
        context: String,
        /// Error message
        message: String,
    },
}

impl RecorderError {
    /// Create an initialization error.
    pub fn initialization(context: impl Into<String>, message: impl Into<String>) -> Self {
        RecorderError::Initialization {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an inconsistency error.
    pub fn inconsistency(context: impl Into<String>, message: impl Into<String>) -> Self {
        RecorderError::Inconsistency {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a full-file error for an item of the given size.
    pub fn full_file(data_size_to_write: u64) -> Self {
        RecorderError::FullFile { data_size_to_write }
    }

    /// Create a full-disk error.
    pub fn full_disk(message: impl Into<String>) -> Self {
        RecorderError::FullDisk {
            message: message.into(),
        }
    }

    /// Create a codec error.
    pub fn codec(context: impl Into<String>, message: impl Into<String>) -> Self {
        RecorderError::Codec {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Get structured fields for logging.
    pub fn log_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            RecorderError::Initialization { context, message } => {
                vec![("context", context.clone()), ("message", message.clone())]
            }
            RecorderError::Inconsistency { context, message } => {
                vec![("context", context.clone()), ("message", message.clone())]
            }
            RecorderError::FullFile { data_size_to_write } => {
                vec![("data_size_to_write", data_size_to_write.to_string())]
            }
            RecorderError::FullDisk { message } => vec![("message", message.clone())],
            RecorderError::Codec { context, message } => {
                vec![("context", context.clone()), ("message", message.clone())]
            }
        }
    }
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Initialization { context, message } => {
                write!(f, "Initialization error in {context}: {message}")
            }
            RecorderError::Inconsistency { context, message } => {
                write!(f, "Inconsistency in {context}: {message}")
            }
            RecorderError::FullFile { data_size_to_write } => {
                write!(
                    f,
                    "File budget overflow: {data_size_to_write} bytes do not fit"
                )
            }
            RecorderError::FullDisk { message } => write!(f, "Disk budget exhausted: {message}"),
            RecorderError::Codec { context, message } => {
                write!(f, "Codec error in {context}: {message}")
            }
        }
    }
}

impl std::error::Error for RecorderError {}

impl From<std::io::Error> for RecorderError {
    fn from(err: std::io::Error) -> Self {
        RecorderError::Codec {
            context: "IO".to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for roborec operations.
pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_error() {
        let err = RecorderError::initialization("McapCodec", "open failed");
        assert!(matches!(err, RecorderError::Initialization { .. }));
        assert_eq!(
            err.to_string(),
            "Initialization error in McapCodec: open failed"
        );
    }

    #[test]
    fn test_inconsistency_error() {
        let err = RecorderError::inconsistency("channel", "schema not found");
        assert!(matches!(err, RecorderError::Inconsistency { .. }));
        assert_eq!(
            err.to_string(),
            "Inconsistency in channel: schema not found"
        );
    }

    #[test]
    fn test_full_file_error_carries_item_size() {
        let err = RecorderError::full_file(512);
        match err {
            RecorderError::FullFile { data_size_to_write } => {
                assert_eq!(data_size_to_write, 512)
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_full_disk_error() {
        let err = RecorderError::full_disk("budget of 1024 bytes reached");
        assert_eq!(
            err.to_string(),
            "Disk budget exhausted: budget of 1024 bytes reached"
        );
    }

    #[test]
    fn test_log_fields_full_file() {
        let err = RecorderError::full_file(77);
        let fields = err.log_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "data_size_to_write");
        assert_eq!(fields[0].1, "77");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: RecorderError = io_err.into();
        assert!(matches!(err, RecorderError::Codec { .. }));
        assert_eq!(err.to_string(), "Codec error in IO: denied");
    }

    #[test]
    fn test_error_clone() {
        let err1 = RecorderError::codec("schema", "short write");
        let err2 = err1.clone();
        assert_eq!(err1.to_string(), err2.to_string());
    }
}
