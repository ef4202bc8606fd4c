//! Durable, append-only fingerprint ledger.
//!
//! Entries are appended to a uniquely named staging file next to the final
//! ledger location. Sealing syncs the staging file and atomically renames it
//! into place, so a reader sees either the previous sealed ledger or the new
//! complete one, never a partial write.
//!
//! File layout:
//!
//! ```text
//! [u32 header_len][bincode LedgerHeader]
//! ([u32 len][16-byte ContentHash][bincode FingerprintEntry])*
//! [u32::MAX][u64 entry_count]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use confcache_common::ContentHash;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entry::FingerprintEntry;
use crate::error::LedgerError;

/// Magic bytes identifying a fingerprint ledger.
const LEDGER_MAGIC: [u8; 4] = *b"CCFL";

/// Current ledger format version. Increment on breaking changes to the
/// header, framing, or entry encoding.
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// Frame length value that marks the end of the entry stream.
const END_MARKER: u32 = u32::MAX;

/// Upper bound for a single encoded entry or header.
///
/// A corrupted length prefix must fail the read, not request a huge allocation.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Header written at the start of every ledger file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerHeader {
    /// Magic bytes: must be `b"CCFL"`.
    magic: [u8; 4],
    /// Ledger format version.
    format_version: u32,
    /// Version of the crate that produced the ledger.
    producer_version: String,
}

/// A reference to a sealed ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHandle {
    path: PathBuf,
    entry_count: u64,
}

impl LedgerHandle {
    /// Location of the sealed ledger.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries sealed into the ledger.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }
}

/// The write side of a durable fingerprint log.
///
/// The recorder owns exactly one writer on a background thread, feeds it
/// batches, and finally either seals or abandons it.
pub trait LogWriter<V>: Send + 'static {
    /// Appends a batch of entries to the unsealed log.
    fn append(&mut self, batch: &[FingerprintEntry<V>]) -> Result<(), LedgerError>;

    /// Makes every appended entry durable and visible to readers.
    fn seal(self) -> Result<LedgerHandle, LedgerError>;

    /// Drops every appended entry without publishing anything.
    fn abandon(self);
}

/// File-backed [`LogWriter`] using the staging-file-and-rename scheme.
pub struct FileLedgerWriter<V> {
    dest: PathBuf,
    staging: PathBuf,
    out: Option<BufWriter<File>>,
    written: u64,
    sealed: bool,
    _entries: PhantomData<fn(V)>,
}

impl<V> FileLedgerWriter<V> {
    /// Opens a staging file for a ledger that will be sealed at `dest`.
    ///
    /// Creates the parent directory if needed. The ledger at `dest`, if any,
    /// stays readable until [`LogWriter::seal`] replaces it.
    pub fn create(dest: &Path) -> Result<Self, LedgerError> {
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| LedgerError::Io {
            path: parent.clone(),
            source: e,
        })?;

        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("ledger");
        let staging = parent.join(format!(
            ".{file_name}.{}.{}.tmp",
            std::process::id(),
            STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .map_err(|e| LedgerError::Io {
                path: staging.clone(),
                source: e,
            })?;

        let mut writer = Self {
            dest: dest.to_path_buf(),
            staging,
            out: Some(BufWriter::new(file)),
            written: 0,
            sealed: false,
            _entries: PhantomData,
        };
        writer.write_header()?;
        Ok(writer)
    }

    /// Path of the staging file receiving appended entries.
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    fn write_header(&mut self) -> Result<(), LedgerError> {
        let header = LedgerHeader {
            magic: LEDGER_MAGIC,
            format_version: LEDGER_FORMAT_VERSION,
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| LedgerError::Serialization {
                reason: e.to_string(),
            })?;
        let header_len = header_bytes.len() as u32;
        self.write_all(&header_len.to_le_bytes())?;
        self.write_all(&header_bytes)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LedgerError> {
        let Some(out) = self.out.as_mut() else {
            return Err(LedgerError::Serialization {
                reason: "ledger writer is closed".to_string(),
            });
        };
        out.write_all(bytes).map_err(|e| LedgerError::Io {
            path: self.staging.clone(),
            source: e,
        })
    }
}

impl<V: Serialize + Send + 'static> LogWriter<V> for FileLedgerWriter<V> {
    fn append(&mut self, batch: &[FingerprintEntry<V>]) -> Result<(), LedgerError> {
        for entry in batch {
            let payload = bincode::serde::encode_to_vec(entry, bincode::config::standard())
                .map_err(|e| LedgerError::Serialization {
                    reason: e.to_string(),
                })?;
            if payload.len() > MAX_FRAME_BYTES {
                return Err(LedgerError::Serialization {
                    reason: format!(
                        "entry of {} bytes exceeds the {MAX_FRAME_BYTES} byte frame limit",
                        payload.len()
                    ),
                });
            }
            let checksum = ContentHash::from_bytes(&payload);
            self.write_all(&(payload.len() as u32).to_le_bytes())?;
            self.write_all(checksum.as_bytes())?;
            self.write_all(&payload)?;
            self.written += 1;
        }
        Ok(())
    }

    fn seal(mut self) -> Result<LedgerHandle, LedgerError> {
        let count = self.written.to_le_bytes();
        self.write_all(&END_MARKER.to_le_bytes())?;
        self.write_all(&count)?;

        let Some(out) = self.out.take() else {
            return Err(LedgerError::Serialization {
                reason: "ledger writer is closed".to_string(),
            });
        };
        let file = out.into_inner().map_err(|e| LedgerError::Io {
            path: self.staging.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|e| LedgerError::Io {
            path: self.staging.clone(),
            source: e,
        })?;
        drop(file);

        fs::rename(&self.staging, &self.dest).map_err(|e| LedgerError::Io {
            path: self.dest.clone(),
            source: e,
        })?;
        self.sealed = true;
        if let Some(parent) = self.dest.parent() {
            sync_dir_best_effort(parent);
        }

        tracing::debug!(
            target: "confcache.ledger",
            path = %self.dest.display(),
            entries = self.written,
            "sealed fingerprint ledger"
        );
        Ok(LedgerHandle {
            path: self.dest.clone(),
            entry_count: self.written,
        })
    }

    fn abandon(self) {
        tracing::debug!(
            target: "confcache.ledger",
            path = %self.staging.display(),
            entries = self.written,
            "abandoning unsealed fingerprint ledger"
        );
    }
}

impl<V> Drop for FileLedgerWriter<V> {
    fn drop(&mut self) {
        if self.sealed {
            return;
        }
        drop(self.out.take());
        if let Err(err) = fs::remove_file(&self.staging) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "confcache.ledger",
                    path = %self.staging.display(),
                    error = %err,
                    "failed to remove ledger staging file"
                );
            }
        }
    }
}

fn sync_dir_best_effort(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(
            target: "confcache.ledger",
            path = %dir.display(),
            error = %err,
            "failed to sync ledger directory"
        );
    }
}

/// Lazy reader over the entries of a sealed ledger.
///
/// Entries are decoded one frame at a time. The iterator is finite and cannot
/// be restarted; after yielding an error it yields nothing more.
pub struct LedgerReader<V> {
    path: PathBuf,
    input: BufReader<File>,
    read: u64,
    done: bool,
    _entries: PhantomData<fn() -> V>,
}

/// Opens the sealed ledger referenced by `handle`.
pub fn read_sealed<V: DeserializeOwned>(
    handle: &LedgerHandle,
) -> Result<LedgerReader<V>, LedgerError> {
    open_ledger(handle.path())
}

/// Opens a sealed ledger at `path` and validates its header.
///
/// Returns [`LedgerError::NotFound`] if no ledger was ever sealed there.
pub fn open_ledger<V: DeserializeOwned>(path: &Path) -> Result<LedgerReader<V>, LedgerError> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            LedgerError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            LedgerError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let mut reader = LedgerReader {
        path: path.to_path_buf(),
        input: BufReader::new(file),
        read: 0,
        done: false,
        _entries: PhantomData,
    };
    reader.read_header()?;
    Ok(reader)
}

impl<V: DeserializeOwned> LedgerReader<V> {
    /// Number of entries yielded so far.
    pub fn entries_read(&self) -> u64 {
        self.read
    }

    /// Path of the ledger being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_header(&mut self) -> Result<(), LedgerError> {
        let mut len_bytes = [0u8; 4];
        self.input
            .read_exact(&mut len_bytes)
            .map_err(|e| self.header_error(e, "missing header length"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if header_len > MAX_FRAME_BYTES {
            return Err(LedgerError::InvalidHeader {
                path: self.path.clone(),
                reason: format!("header length {header_len} is implausible"),
            });
        }
        let mut header_bytes = vec![0u8; header_len];
        self.input
            .read_exact(&mut header_bytes)
            .map_err(|e| self.header_error(e, "header is truncated"))?;

        let (header, _): (LedgerHeader, usize) =
            bincode::serde::decode_from_slice(&header_bytes, bincode::config::standard())
                .map_err(|e| LedgerError::InvalidHeader {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })?;

        if header.magic != LEDGER_MAGIC {
            return Err(LedgerError::InvalidHeader {
                path: self.path.clone(),
                reason: "bad magic bytes".to_string(),
            });
        }
        if header.format_version != LEDGER_FORMAT_VERSION {
            return Err(LedgerError::VersionMismatch {
                path: self.path.clone(),
                expected: LEDGER_FORMAT_VERSION,
                actual: header.format_version,
            });
        }
        Ok(())
    }

    fn header_error(&self, err: io::Error, reason: &str) -> LedgerError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            LedgerError::InvalidHeader {
                path: self.path.clone(),
                reason: reason.to_string(),
            }
        } else {
            LedgerError::Io {
                path: self.path.clone(),
                source: err,
            }
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), LedgerError> {
        self.input.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                LedgerError::Truncated {
                    path: self.path.clone(),
                    read: self.read,
                }
            } else {
                LedgerError::Io {
                    path: self.path.clone(),
                    source: e,
                }
            }
        })
    }

    fn read_frame(&mut self) -> Result<Option<FingerprintEntry<V>>, LedgerError> {
        let mut len_bytes = [0u8; 4];
        self.fill(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes);

        if len == END_MARKER {
            let mut count_bytes = [0u8; 8];
            self.fill(&mut count_bytes)?;
            if u64::from_le_bytes(count_bytes) != self.read {
                return Err(LedgerError::Truncated {
                    path: self.path.clone(),
                    read: self.read,
                });
            }
            let mut probe = [0u8; 1];
            let trailing = self.input.read(&mut probe).map_err(|e| LedgerError::Io {
                path: self.path.clone(),
                source: e,
            })?;
            if trailing != 0 {
                return Err(LedgerError::Serialization {
                    reason: format!("trailing data after end of {}", self.path.display()),
                });
            }
            return Ok(None);
        }

        let len = len as usize;
        if len > MAX_FRAME_BYTES {
            return Err(LedgerError::Serialization {
                reason: format!("frame {} claims {len} bytes", self.read),
            });
        }

        let mut checksum = [0u8; ContentHash::LEN];
        self.fill(&mut checksum)?;
        let mut payload = vec![0u8; len];
        self.fill(&mut payload)?;

        if ContentHash::from_bytes(&payload) != ContentHash::from_raw(checksum) {
            return Err(LedgerError::ChecksumMismatch {
                path: self.path.clone(),
                index: self.read,
            });
        }

        let (entry, _): (FingerprintEntry<V>, usize) =
            bincode::serde::decode_from_slice(&payload, bincode::config::standard()).map_err(
                |e| LedgerError::Serialization {
                    reason: format!("entry {}: {e}", self.read),
                },
            )?;
        Ok(Some(entry))
    }
}

impl<V: DeserializeOwned> Iterator for LedgerReader<V> {
    type Item = Result<FingerprintEntry<V>, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(entry)) => {
                self.read += 1;
                Some(Ok(entry))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<V: DeserializeOwned> FusedIterator for LedgerReader<V> {}
