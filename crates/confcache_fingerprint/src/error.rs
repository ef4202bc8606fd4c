//! Error types for ledger persistence, recording, and fingerprint evaluation.

use std::path::PathBuf;

/// Errors raised by the durable fingerprint ledger.
///
/// A ledger that fails to write abandons the cache write for the build; a
/// ledger that fails to read forces full re-evaluation. Neither is fatal to
/// the build itself.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// An I/O error occurred while reading or writing a ledger file.
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// No sealed ledger exists at the given path.
    #[error("no sealed ledger at {path}")]
    NotFound {
        /// The expected ledger path.
        path: PathBuf,
    },

    /// An entry or header could not be encoded or decoded.
    #[error("ledger serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The ledger header is missing or malformed.
    #[error("invalid ledger header in {path}: {reason}")]
    InvalidHeader {
        /// The ledger file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The ledger was written by an incompatible format version.
    #[error("ledger version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The ledger file path.
        path: PathBuf,
        /// The format version this build reads.
        expected: u32,
        /// The format version found in the file.
        actual: u32,
    },

    /// A frame's stored checksum does not match its payload.
    #[error("checksum mismatch in {path} at entry {index}")]
    ChecksumMismatch {
        /// The ledger file path.
        path: PathBuf,
        /// Zero-based index of the damaged entry.
        index: u64,
    },

    /// The ledger ended before its end marker, or the marker's count disagrees
    /// with the entries actually read.
    #[error("truncated ledger {path}: read {read} entries before the data ended")]
    Truncated {
        /// The ledger file path.
        path: PathBuf,
        /// Number of entries successfully read.
        read: u64,
    },
}

/// Errors reported by [`FingerprintRecorder`](crate::FingerprintRecorder).
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The ledger was already sealed or discarded.
    #[error("fingerprint ledger is already sealed")]
    Sealed,

    /// The background writer could not be started or stopped unexpectedly.
    #[error("ledger writer failed: {reason}")]
    WriterFailed {
        /// Description of the writer failure.
        reason: String,
    },

    /// Persisting the ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A failure while evaluating a recorded fingerprint.
///
/// The checker never propagates these: an evaluation failure marks the
/// owning project invalid with the error text as its reason.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The input referenced by the fingerprint could not be accessed.
    #[error("input '{input}' is unavailable: {reason}")]
    Unavailable {
        /// Human-readable name of the input (file path, variable name, ...).
        input: String,
        /// Why it could not be accessed.
        reason: String,
    },

    /// An I/O error while inspecting the input.
    #[error("I/O error reading '{input}': {source}")]
    Io {
        /// Human-readable name of the input.
        input: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Any other evaluation failure.
    #[error("{0}")]
    Other(String),
}
