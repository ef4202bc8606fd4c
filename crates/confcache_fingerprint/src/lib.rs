//! Per-project fingerprinting and invalidation for the configuration cache.
//!
//! While projects are configured, a [`FingerprintRecorder`] collects which
//! external inputs each project read and which projects read each other's
//! models into a durable ledger. On the next build an
//! [`InvalidationChecker`] replays that ledger against the current
//! environment and returns exactly the projects that must be re-evaluated,
//! including every project that transitively consumed one of them.

#![warn(missing_docs)]

pub mod check;
pub mod entry;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod recorder;
pub mod result;

pub use check::{CheckOptions, InvalidationChecker};
pub use entry::{FingerprintEntry, FingerprintValue, ProjectTree, Verdict};
pub use error::{EvaluationError, LedgerError, RecorderError};
pub use graph::DependencyGraph;
pub use ledger::{
    open_ledger, read_sealed, FileLedgerWriter, LedgerHandle, LedgerReader, LogWriter,
    LEDGER_FORMAT_VERSION,
};
pub use recorder::FingerprintRecorder;
pub use result::{CheckedFingerprint, InvalidationReason, InvalidationReport, InvalidationResult};
