//! Configuration types deserialized from `confcache.toml`.

use serde::Deserialize;
use std::path::PathBuf;

/// Default directory for sealed ledgers, relative to the build root.
pub const DEFAULT_LEDGER_DIR: &str = ".confcache";

/// Default ledger file name inside [`LedgerConfig::directory`].
pub const DEFAULT_LEDGER_FILE: &str = "fingerprints.ledger";

/// Default number of entries the recorder buffers before a bulk append.
pub const DEFAULT_FLUSH_BATCH: usize = 512;

/// Default number of fingerprint entries evaluated per parallel batch.
pub const DEFAULT_CHECK_BATCH: usize = 4096;

/// The top-level configuration parsed from `confcache.toml`.
///
/// Every section is optional; an empty file yields [`CacheConfig::default`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Where and how fingerprint ledgers are persisted.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// How the invalidation check evaluates recorded fingerprints.
    #[serde(default)]
    pub check: CheckConfig,
}

/// Ledger persistence settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding the sealed ledger and its staging files.
    pub directory: PathBuf,
    /// File name of the sealed ledger.
    pub file_name: String,
    /// Entries buffered by the writer before they are appended in one go.
    pub flush_batch: usize,
}

impl LedgerConfig {
    /// Returns the full path of the sealed ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LEDGER_DIR),
            file_name: DEFAULT_LEDGER_FILE.to_string(),
            flush_batch: DEFAULT_FLUSH_BATCH,
        }
    }
}

/// Invalidation check settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckConfig {
    /// Evaluate fingerprints on a thread pool instead of the calling thread.
    pub parallel: bool,
    /// Fingerprint entries evaluated per batch while streaming the ledger.
    pub batch_size: usize,
    /// Size of a dedicated evaluation pool. `None` uses the global pool.
    pub threads: Option<usize>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            batch_size: DEFAULT_CHECK_BATCH,
            threads: None,
        }
    }
}
