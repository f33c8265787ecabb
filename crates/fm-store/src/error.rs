//! Error and Result types for FleetMetrics store operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for store operations.
pub type Result<T> = std::result::Result<T, FmError>;

/// The error type for store operations.
#[derive(Debug, Error)]
pub enum FmError {
    /// Record checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// CRC32 checksum stored in the record frame.
        expected: u32,
        /// CRC32 checksum recomputed over the payload.
        actual: u32,
    },

    /// Record frame is too short to contain a checksum and payload.
    #[error("Invalid record: {len} bytes is shorter than the checksum frame")]
    InvalidRecord {
        /// Total length of the record frame in bytes.
        len: usize,
    },

    /// Record payload failed to decode.
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index store failure (log append, replay, or compaction).
    #[error("Index error: {0}")]
    Index(String),

    /// Archive tool exited with a failure status.
    #[error("Archive tool failed with status {status}: {stderr}")]
    Archive {
        /// Exit code of the archive subprocess, -1 when killed by a signal.
        status: i32,
        /// Captured standard error of the subprocess.
        stderr: String,
    },

    /// A requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),
}
