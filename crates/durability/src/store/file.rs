//! File-backed batch log store
//!
//! # Layout
//!
//! One append-only file, `batchlog.log`, holding put and delete records (see
//! [`crate::format`]). The live set is kept in an in-memory index rebuilt by
//! replaying the file on open.
//!
//! # Durability
//!
//! Every record is written to the OS before `put`/`delete` returns, so a
//! process crash never loses an acknowledged entry. Surviving a machine crash
//! depends on the sync mode: `Always` fsyncs each record, `Batched` fsyncs on
//! `flush` and from a background thread every `sync_interval`.
//!
//! A write that fails part way is rolled back to the previous end of file,
//! so later records never follow a torn one. If the rollback itself fails
//! the store refuses further writes.
//!
//! # Recovery
//!
//! Records are read in order until the first one that fails to parse. A torn
//! write at the tail or a corrupt record ends the valid prefix; the file is
//! truncated back to it so later appends never follow garbage.
//!
//! # Compaction
//!
//! Overwritten puts and deleted entries leave dead records behind. Once they
//! pass the configured thresholds, `flush` rewrites the live entries into a
//! temporary file, fsyncs it and renames it over the log. The temporary file
//! stays open and becomes the append handle, so nothing has to be reopened
//! after the rename.

use super::mode::SyncMode;
use super::{BatchLogStore, BatchScan};
use crate::entry::BatchEntry;
use crate::format::{FormatError, LogHeader, LogRecord, FILE_HEADER_SIZE, MAX_RECORD_SIZE};
use batchlog_core::{BatchId, StoreError, StoreResult};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Name of the log file inside the store directory
pub const LOG_FILE_NAME: &str = "batchlog.log";

/// Tuning for [`FileBatchStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreOptions {
    /// When records are fsynced
    pub sync: SyncMode,
    /// Longest time a `Batched` write stays unsynced. Zero disables the
    /// background sync thread.
    pub sync_interval: Duration,
    /// Minimum number of dead records before compaction is considered
    pub compaction_min_garbage: u64,
    /// Fraction of dead records (0, 1] that triggers compaction
    pub compaction_garbage_ratio: f64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync: SyncMode::Batched,
            sync_interval: Duration::from_millis(100),
            compaction_min_garbage: 1024,
            compaction_garbage_ratio: 0.5,
        }
    }
}

fn record_error(e: FormatError) -> StoreError {
    match e {
        FormatError::RecordTooLarge(size) => StoreError::EntryTooLarge {
            size,
            max: u64::from(MAX_RECORD_SIZE),
        },
        other => StoreError::Corruption(other.to_string()),
    }
}

struct LogFile {
    file: File,
    /// Records in the file, live or dead
    records: u64,
    /// Records that no longer describe a live entry
    dead: u64,
    /// End of the last complete record
    size: u64,
    /// Written since the last fsync
    unsynced: bool,
    /// A failed write could not be rolled back
    broken: bool,
}

impl LogFile {
    fn new(file: File, records: u64, dead: u64, size: u64) -> Self {
        Self {
            file,
            records,
            dead,
            size,
            unsynced: false,
            broken: false,
        }
    }

    fn append(&mut self, record: &LogRecord, sync: SyncMode) -> StoreResult<()> {
        if self.broken {
            return Err(StoreError::Unavailable(
                "batch log refuses writes after a failed rollback".to_string(),
            ));
        }
        let bytes = record.to_bytes().map_err(record_error)?;

        let start = self.size;
        if let Err(e) = self.write_record(&bytes, sync) {
            self.rollback(start);
            return Err(e.into());
        }
        self.records += 1;
        self.size += bytes.len() as u64;
        Ok(())
    }

    fn write_record(&mut self, bytes: &[u8], sync: SyncMode) -> std::io::Result<()> {
        self.file.write_all(bytes)?;
        self.unsynced = true;
        if sync.requires_immediate_fsync() {
            self.sync()?;
        }
        Ok(())
    }

    /// Cut the file back to `len` after a failed write.
    fn rollback(&mut self, len: u64) {
        let restored = self
            .file
            .set_len(len)
            .and_then(|()| self.file.seek(SeekFrom::Start(len)).map(drop));
        match restored {
            Ok(()) => debug!(offset = len, "Rolled back failed batch log write"),
            Err(e) => {
                error!(
                    offset = len,
                    error = %e,
                    "Could not roll back failed batch log write, refusing further writes"
                );
                self.broken = true;
            }
        }
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_data()?;
        self.unsynced = false;
        Ok(())
    }
}

struct StoreShared {
    path: PathBuf,
    options: StoreOptions,
    /// Lock order: `log` before `index`
    log: Mutex<LogFile>,
    index: RwLock<BTreeMap<BatchId, BatchEntry>>,
}

impl StoreShared {
    fn should_compact(&self, log: &LogFile) -> bool {
        log.dead >= self.options.compaction_min_garbage
            && log.records > 0
            && (log.dead as f64 / log.records as f64) >= self.options.compaction_garbage_ratio
    }

    /// fsync if anything was written since the last sync
    fn sync_pending(&self) -> StoreResult<()> {
        let mut log = self.log.lock();
        if log.unsynced {
            log.sync()?;
        }
        Ok(())
    }

    fn compact_locked(&self, log: &mut LogFile) -> StoreResult<()> {
        log.sync()?;

        let temp_path = self.path.with_extension("log.tmp");
        let index = self.index.read();
        let before = log.size;

        let (file, size) = match write_compacted(&temp_path, &index) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        sync_parent_dir(&self.path);

        *log = LogFile::new(file, index.len() as u64, 0, size);

        info!(
            live = index.len(),
            bytes_before = before,
            bytes_after = size,
            "Compacted batch log"
        );
        Ok(())
    }
}

/// Write every live entry to `temp_path` and fsync it. Returns the open
/// handle positioned at the end, ready for appends.
fn write_compacted(
    temp_path: &Path,
    index: &BTreeMap<BatchId, BatchEntry>,
) -> StoreResult<(File, u64)> {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(temp_path)?;

    let mut size = FILE_HEADER_SIZE as u64;
    {
        let mut writer = BufWriter::new(&mut file);
        writer.write_all(&LogHeader::new().to_bytes())?;
        for entry in index.values() {
            let bytes = LogRecord::Put(entry.clone()).to_bytes().map_err(record_error)?;
            writer.write_all(&bytes)?;
            size += bytes.len() as u64;
        }
        writer.flush()?;
    }
    file.sync_all()?;
    Ok((file, size))
}

/// Make a rename durable. Failure only widens the window in which a machine
/// crash brings back the old log, which is still a valid log.
fn sync_parent_dir(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            debug!(dir = %dir.display(), error = %e, "Directory sync failed");
        }
    }
}

type SyncSignal = Arc<(Mutex<bool>, Condvar)>;

/// Background thread bounding how long a `Batched` write stays unsynced.
struct SyncThread {
    signal: SyncSignal,
    thread: Option<JoinHandle<()>>,
}

impl SyncThread {
    fn start(shared: Arc<StoreShared>, interval: Duration) -> std::io::Result<Self> {
        let signal: SyncSignal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let thread = std::thread::Builder::new()
            .name("batchlog-sync".to_string())
            .spawn(move || sync_loop(&shared, &thread_signal, interval))?;
        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.signal;
            *lock.lock() = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn sync_loop(shared: &StoreShared, signal: &(Mutex<bool>, Condvar), interval: Duration) {
    let (lock, cvar) = signal;
    loop {
        {
            let mut stop = lock.lock();
            if !*stop {
                cvar.wait_for(&mut stop, interval);
            }
            if *stop {
                break;
            }
        }
        if let Err(e) = shared.sync_pending() {
            warn!(path = %shared.path.display(), error = %e, "Background batch log sync failed");
        }
    }
}

/// Durable store backed by a single append-only log file.
pub struct FileBatchStore {
    shared: Arc<StoreShared>,
    syncer: Option<SyncThread>,
}

impl FileBatchStore {
    /// Open the store in `dir`, creating the directory and log if needed.
    ///
    /// In `Batched` mode with a non-zero `sync_interval` this also starts
    /// the background sync thread, stopped when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] if the file exists but its header is
    /// not a batch log header, or an I/O error.
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);

        let (file, index, records, dead, size) = if path.exists() {
            Self::recover(&path)?
        } else {
            let mut file = OpenOptions::new()
                .create_new(true)
                .read(true)
                .write(true)
                .open(&path)?;
            file.write_all(&LogHeader::new().to_bytes())?;
            file.sync_all()?;
            sync_parent_dir(&path);
            (file, BTreeMap::new(), 0, 0, FILE_HEADER_SIZE as u64)
        };

        info!(
            path = %path.display(),
            live = index.len(),
            records,
            dead,
            sync = %options.sync,
            "Opened batch log"
        );

        let shared = Arc::new(StoreShared {
            path,
            options,
            log: Mutex::new(LogFile::new(file, records, dead, size)),
            index: RwLock::new(index),
        });

        let syncer = if options.sync == SyncMode::Batched && !options.sync_interval.is_zero() {
            Some(SyncThread::start(Arc::clone(&shared), options.sync_interval)?)
        } else {
            None
        };

        Ok(Self { shared, syncer })
    }

    #[allow(clippy::type_complexity)]
    fn recover(path: &Path) -> StoreResult<(File, BTreeMap<BatchId, BatchEntry>, u64, u64, u64)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header_bytes = [0u8; FILE_HEADER_SIZE];
        file.read_exact(&mut header_bytes).map_err(|e| {
            StoreError::Corruption(format!("{}: unreadable header: {}", path.display(), e))
        })?;
        let header = LogHeader::from_bytes(&header_bytes);
        if !header.is_valid() {
            return Err(StoreError::Corruption(format!(
                "{}: not a batch log (magic {:?}, format {})",
                path.display(),
                header.magic,
                header.format_version
            )));
        }

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let mut index = BTreeMap::new();
        let mut records = 0u64;
        let mut dead = 0u64;
        let mut offset = 0usize;
        while offset < buffer.len() {
            match LogRecord::from_bytes(&buffer[offset..]) {
                Ok((record, consumed)) => {
                    offset += consumed;
                    records += 1;
                    match record {
                        LogRecord::Put(entry) => {
                            if index.insert(entry.id, entry).is_some() {
                                dead += 1;
                            }
                        }
                        LogRecord::Delete(id) => {
                            // The delete itself is dead weight, and so is the put it removes
                            dead += if index.remove(&id).is_some() { 2 } else { 1 };
                        }
                    }
                }
                Err(FormatError::InsufficientData) => {
                    warn!(
                        path = %path.display(),
                        offset = FILE_HEADER_SIZE + offset,
                        "Torn record at batch log tail, truncating"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset = FILE_HEADER_SIZE + offset,
                        error = %e,
                        "Corrupt batch log record, truncating log at last valid record"
                    );
                    break;
                }
            }
        }

        let valid_end = (FILE_HEADER_SIZE + offset) as u64;
        if offset < buffer.len() {
            file.set_len(valid_end)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_end))?;

        Ok((file, index, records, dead, valid_end))
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Current log file size in bytes
    pub fn file_size(&self) -> u64 {
        self.shared.log.lock().size
    }

    /// Number of dead records awaiting compaction
    pub fn garbage(&self) -> u64 {
        self.shared.log.lock().dead
    }

    /// Whether records were written since the last fsync
    pub fn has_unsynced_writes(&self) -> bool {
        self.shared.log.lock().unsynced
    }

    /// Rewrite the log so it holds exactly one put per live entry.
    ///
    /// Uses the temp file + rename pattern: a crash at any point leaves
    /// either the old log or the new one, never a mix. On failure the old
    /// log stays in place and keeps accepting writes.
    pub fn compact(&self) -> StoreResult<()> {
        let mut log = self.shared.log.lock();
        self.shared.compact_locked(&mut log)
    }
}

impl BatchLogStore for FileBatchStore {
    fn put(&self, entry: BatchEntry) -> StoreResult<()> {
        let shared = &self.shared;
        let mut log = shared.log.lock();
        log.append(&LogRecord::Put(entry.clone()), shared.options.sync)?;

        let mut index = shared.index.write();
        if index.insert(entry.id, entry).is_some() {
            log.dead += 1;
        }
        Ok(())
    }

    fn get(&self, id: &BatchId) -> Option<BatchEntry> {
        self.shared.index.read().get(id).cloned()
    }

    fn scan_all(&self) -> BatchScan<'_> {
        let ids = self.shared.index.read().keys().copied().collect();
        BatchScan::new(ids, move |id| self.get(id))
    }

    fn delete(&self, id: &BatchId) -> StoreResult<()> {
        let shared = &self.shared;
        let mut log = shared.log.lock();
        if !shared.index.read().contains_key(id) {
            return Ok(());
        }
        log.append(&LogRecord::Delete(*id), shared.options.sync)?;
        shared.index.write().remove(id);
        log.dead += 2;
        debug!(batch_id = %id, "Deleted batch log entry");
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        let shared = &self.shared;
        let mut log = shared.log.lock();
        log.sync()?;
        if shared.should_compact(&log) {
            shared.compact_locked(&mut log)?;
        }
        Ok(())
    }

    fn count(&self) -> u64 {
        self.shared.index.read().len() as u64
    }
}

impl Drop for FileBatchStore {
    fn drop(&mut self) {
        if let Some(mut syncer) = self.syncer.take() {
            syncer.stop();
        }
        if let Err(e) = self.shared.sync_pending() {
            warn!(path = %self.shared.path.display(), error = %e, "Final batch log sync failed");
        }
    }
}

impl std::fmt::Debug for FileBatchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBatchStore")
            .field("path", &self.shared.path)
            .field("options", &self.shared.options)
            .field("live", &self.count())
            .finish()
    }
}
