//! Concurrent fingerprint recording during the configuration phase.
//!
//! Producers call [`FingerprintRecorder::record`] from any thread. Entries go
//! through a channel to a single background writer that appends them to the
//! [`LogWriter`] in batches, so producers never wait on disk I/O or on each
//! other. [`FingerprintRecorder::finish`] is the only publication point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use confcache_common::ProjectPath;
use confcache_config::LedgerConfig;
use serde::Serialize;

use crate::entry::FingerprintEntry;
use crate::error::{LedgerError, RecorderError};
use crate::ledger::{FileLedgerWriter, LedgerHandle, LogWriter};

/// What the background writer hands back once the channel closes.
enum Drained<W> {
    /// All entries were appended; the writer is ready to seal.
    Ready(W),
    /// An append failed; the writer was abandoned.
    Failed(LedgerError),
    /// Recording was cancelled; the writer was abandoned.
    Cancelled,
}

/// Collects fingerprint entries from concurrently configured projects into
/// one ledger.
pub struct FingerprintRecorder<V, W> {
    sender: RwLock<Option<Sender<FingerprintEntry<V>>>>,
    worker: Mutex<Option<JoinHandle<Drained<W>>>>,
    cancelled: Arc<AtomicBool>,
    recorded: AtomicU64,
}

impl<V> FingerprintRecorder<V, FileLedgerWriter<V>>
where
    V: Serialize + Send + 'static,
{
    /// Starts recording into a file ledger at the configured location.
    pub fn create(config: &LedgerConfig) -> Result<Self, RecorderError> {
        let writer = FileLedgerWriter::create(&config.ledger_path())?;
        Self::start(writer, config.flush_batch)
    }
}

impl<V, W> FingerprintRecorder<V, W>
where
    V: Send + 'static,
    W: LogWriter<V>,
{
    /// Spawns the background writer and returns a recorder feeding it.
    ///
    /// `flush_batch` is the number of entries buffered before each append.
    pub fn start(writer: W, flush_batch: usize) -> Result<Self, RecorderError> {
        let (tx, rx) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let flush_batch = flush_batch.max(1);

        let worker = std::thread::Builder::new()
            .name("confcache-ledger-writer".to_string())
            .spawn(move || drain(rx, writer, flush_batch, &flag))
            .map_err(|e| RecorderError::WriterFailed {
                reason: e.to_string(),
            })?;

        Ok(Self {
            sender: RwLock::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            cancelled,
            recorded: AtomicU64::new(0),
        })
    }

    /// Appends one entry to the ledger.
    ///
    /// Never blocks on I/O. Fails with [`RecorderError::Sealed`] once the
    /// ledger has been finished or discarded.
    pub fn record(&self, entry: FingerprintEntry<V>) -> Result<(), RecorderError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(RecorderError::Sealed);
        };
        tx.send(entry).map_err(|_| RecorderError::WriterFailed {
            reason: "ledger writer thread stopped".to_string(),
        })?;
        self.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Records that the evaluation of `project` depended on `value`.
    pub fn record_fingerprint(&self, project: ProjectPath, value: V) -> Result<(), RecorderError> {
        self.record(FingerprintEntry::fingerprint(project, value))
    }

    /// Records that evaluating `consumer` read the evaluated model of `target`.
    pub fn record_dependency(
        &self,
        consumer: ProjectPath,
        target: ProjectPath,
    ) -> Result<(), RecorderError> {
        self.record(FingerprintEntry::dependency(consumer, target))
    }

    /// Number of entries accepted so far.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Seals the ledger and returns a handle for reading it back.
    ///
    /// Must be called once, after every producer is done. On error nothing
    /// is published and the caller should skip writing the cache for this
    /// build.
    pub fn finish(&self) -> Result<LedgerHandle, RecorderError> {
        let result = match self.stop()? {
            Drained::Ready(writer) => writer.seal().map_err(RecorderError::from),
            Drained::Failed(err) => Err(err.into()),
            Drained::Cancelled => Err(RecorderError::Sealed),
        };
        match &result {
            Ok(handle) => tracing::debug!(
                target: "confcache.recorder",
                path = %handle.path().display(),
                entries = handle.entry_count(),
                "fingerprint ledger finished"
            ),
            Err(err) => tracing::warn!(
                target: "confcache.recorder",
                error = %err,
                "failed to persist fingerprint ledger; skipping configuration cache write"
            ),
        }
        result
    }

    /// Drops every buffered entry and publishes nothing.
    ///
    /// Used when the build is cancelled before recording finishes. Dropping
    /// an unfinished recorder has the same effect.
    pub fn discard(&self) {
        self.cancelled.store(true, Ordering::Release);
        if self.stop().is_ok() {
            tracing::debug!(
                target: "confcache.recorder",
                entries = self.recorded(),
                "discarded unfinished fingerprint ledger"
            );
        }
    }

    fn stop(&self) -> Result<Drained<W>, RecorderError> {
        stop_worker(&self.sender, &self.worker)
    }
}

/// Closes the channel and waits for the background writer to drain it.
fn stop_worker<V, W>(
    sender: &RwLock<Option<Sender<FingerprintEntry<V>>>>,
    worker: &Mutex<Option<JoinHandle<Drained<W>>>>,
) -> Result<Drained<W>, RecorderError> {
    let tx = sender
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if tx.is_none() {
        return Err(RecorderError::Sealed);
    }
    drop(tx);

    let handle = worker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or(RecorderError::Sealed)?;
    handle.join().map_err(|_| RecorderError::WriterFailed {
        reason: "ledger writer thread panicked".to_string(),
    })
}

impl<V, W> Drop for FingerprintRecorder<V, W> {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        // The writer abandons its staging data when it sees the flag.
        let _ = stop_worker(&self.sender, &self.worker);
    }
}

/// Background writer loop. Runs until every sender is gone.
fn drain<V, W: LogWriter<V>>(
    rx: Receiver<FingerprintEntry<V>>,
    mut writer: W,
    flush_batch: usize,
    cancelled: &AtomicBool,
) -> Drained<W> {
    let mut buffer = Vec::with_capacity(flush_batch);
    let mut failure = None;

    for entry in rx {
        // Keep draining after a failure so producers never see it.
        if failure.is_some() || cancelled.load(Ordering::Acquire) {
            continue;
        }
        buffer.push(entry);
        if buffer.len() >= flush_batch {
            if let Err(err) = writer.append(&buffer) {
                failure = Some(err);
            }
            buffer.clear();
        }
    }

    if cancelled.load(Ordering::Acquire) {
        writer.abandon();
        return Drained::Cancelled;
    }
    if let Some(err) = failure {
        writer.abandon();
        return Drained::Failed(err);
    }
    if !buffer.is_empty() {
        if let Err(err) = writer.append(&buffer) {
            writer.abandon();
            return Drained::Failed(err);
        }
    }
    Drained::Ready(writer)
}
