//! The batch log façade
//!
//! `BatchlogManager` is an explicitly constructed service object: it owns the
//! store, the codec registry, the write path handle, the apply pool and the
//! counters. Nothing in here assumes a process-wide instance.
//!
//! # Entry lifecycle
//!
//! ```text
//! submit ──► Pending ──(age ≥ replay timeout)──► Eligible ──► Replayed
//!               │                                   │
//!               └──── remove (direct delivery) ─────┴──► Delivered
//!                                                   │
//!                                   apply failed ◄──┘ (retried next pass)
//! ```

use crate::apply_pool::ApplyPool;
use crate::config::BatchlogConfig;
use crate::error::{BatchlogError, ReplayError};
use crate::handle::ReplayHandle;
use crate::metrics::{BatchlogMetrics, ReplayCounters};
use crate::replay::{run_pass, ReplayContext, ReplaySettings};
use crate::scheduler::ReplayScheduler;
use batchlog_core::{BatchId, Mutation, Timestamp, WritePath};
use batchlog_durability::{BatchEntry, BatchLogStore, FileBatchStore, MutationCodec};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct ManagerInner {
    ctx: Arc<ReplayContext>,
    /// Single-flight slot: the most recent pass
    in_flight: Mutex<Option<ReplayHandle>>,
    passes: AtomicU64,
    shut_down: AtomicBool,
}

impl ManagerInner {
    fn start_replay(&self) -> ReplayHandle {
        let mut slot = self.in_flight.lock();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                debug!(pass = handle.pass(), "Joining in-flight replay pass");
                return handle.clone();
            }
        }

        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.shut_down.load(Ordering::Acquire) {
            return ReplayHandle::finished(pass, Err(ReplayError::ShutDown));
        }

        let handle = ReplayHandle::new(pass);
        let ctx = Arc::clone(&self.ctx);
        let thread_handle = handle.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("batchlog-replay-{}", pass))
            .spawn(move || {
                let cancel = thread_handle.cancel_token().clone();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    run_pass(&ctx, pass, &cancel)
                }))
                .map_err(|e| {
                    ReplayError::Panicked(
                        e.downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| e.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "(non-string panic)".to_string()),
                    )
                });
                thread_handle.complete(result);
            });
        if let Err(e) = spawned {
            warn!(pass, error = %e, "Failed to spawn replay pass");
            handle.complete(Err(ReplayError::Spawn(e.to_string())));
        }

        *slot = Some(handle.clone());
        handle
    }
}

/// Durable batch log with background replay.
///
/// # Example
///
/// ```ignore
/// let manager = BatchlogManager::open(dir, BatchlogConfig::default(), write_path)?;
/// manager.start()?;
///
/// let entry = manager.submit(&mutations, Timestamp::now())?;
/// // ... deliver directly to replicas ...
/// manager.remove(&entry.id)?;
/// ```
pub struct BatchlogManager {
    inner: Arc<ManagerInner>,
    config: BatchlogConfig,
    scheduler: Mutex<Option<ReplayScheduler>>,
}

impl BatchlogManager {
    /// Build a manager over `store` with the default codec registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the apply pool could
    /// not be spawned.
    pub fn new(
        config: BatchlogConfig,
        store: Arc<dyn BatchLogStore>,
        write_path: Arc<dyn WritePath>,
    ) -> Result<Self, BatchlogError> {
        Self::with_codec(config, store, MutationCodec::default(), write_path)
    }

    /// Build a manager with a custom codec registry.
    pub fn with_codec(
        config: BatchlogConfig,
        store: Arc<dyn BatchLogStore>,
        codec: MutationCodec,
        write_path: Arc<dyn WritePath>,
    ) -> Result<Self, BatchlogError> {
        config.validate()?;
        let pool = ApplyPool::new(config.apply_workers, config.apply_queue_depth)
            .map_err(BatchlogError::Spawn)?;

        let ctx = ReplayContext {
            store,
            codec: Arc::new(codec),
            write_path,
            pool,
            counters: ReplayCounters::new(),
            settings: ReplaySettings {
                replay_timeout: config.replay_timeout(),
                apply_timeout: config.apply_timeout(),
                throttle_bytes_per_sec: config.throttle_bytes_per_sec(),
            },
        };

        info!(
            pending = ctx.store.count(),
            codec = %ctx.codec.current_version(),
            replay_timeout_ms = config.replay_timeout_ms,
            "Batch log manager ready"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                ctx: Arc::new(ctx),
                in_flight: Mutex::new(None),
                passes: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
            config,
            scheduler: Mutex::new(None),
        })
    }

    /// Open (or create) a file-backed batch log in `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        config: BatchlogConfig,
        write_path: Arc<dyn WritePath>,
    ) -> Result<Self, BatchlogError> {
        let store = FileBatchStore::open(dir, config.store_options()?)?;
        Self::new(config, Arc::new(store), write_path)
    }

    /// Durably log a batch of mutations.
    ///
    /// The returned entry's id is what the caller passes to
    /// [`remove`](Self::remove) once direct delivery succeeds.
    ///
    /// # Errors
    ///
    /// Encoding and store failures are returned to the caller: a batch
    /// that was not logged must not be reported as logged.
    pub fn submit(
        &self,
        mutations: &[Mutation],
        timestamp: Timestamp,
    ) -> Result<BatchEntry, BatchlogError> {
        if self.is_shut_down() {
            return Err(BatchlogError::ShutDown);
        }
        let ctx = &self.inner.ctx;
        let version = ctx.codec.current_version();
        let payload = ctx.codec.encode(mutations, version)?;
        let entry = BatchEntry::new(BatchId::new(), timestamp, version, payload);

        ctx.store.put(entry.clone())?;
        ctx.counters.record_submitted();

        debug!(
            batch_id = %entry.id,
            mutations = mutations.len(),
            bytes = entry.payload.len(),
            "Logged batch"
        );
        Ok(entry)
    }

    /// Remove an entry after the coordinator delivered it directly.
    ///
    /// Removing an entry that is already gone is not an error.
    pub fn remove(&self, id: &BatchId) -> Result<(), BatchlogError> {
        self.inner.ctx.store.delete(id)?;
        Ok(())
    }

    /// Trigger a replay pass in the background.
    ///
    /// At most one pass runs at a time: while one is in flight, every call
    /// returns a handle to that same pass.
    pub fn start_replay(&self) -> ReplayHandle {
        self.inner.start_replay()
    }

    /// Number of persisted entries, after flushing the store.
    pub fn count_all_batches(&self) -> Result<u64, BatchlogError> {
        let store = &self.inner.ctx.store;
        store.flush()?;
        Ok(store.count())
    }

    /// Batches replayed and deleted since startup
    pub fn get_total_batches_replayed(&self) -> u64 {
        self.inner.ctx.counters.batches_replayed()
    }

    /// Batches submitted since startup
    pub fn get_total_batches_seen(&self) -> u64 {
        self.inner.ctx.counters.all_batches_seen()
    }

    /// Snapshot of every counter
    pub fn metrics(&self) -> BatchlogMetrics {
        let ctx = &self.inner.ctx;
        ctx.counters.snapshot(ctx.store.count())
    }

    /// Configuration this manager was built with
    pub fn config(&self) -> &BatchlogConfig {
        &self.config
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn BatchLogStore> {
        &self.inner.ctx.store
    }

    /// Codec registry used for new batches and replay
    pub fn codec(&self) -> &MutationCodec {
        &self.inner.ctx.codec
    }

    /// Launch the periodic replay scheduler. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), BatchlogError> {
        if self.is_shut_down() {
            return Err(BatchlogError::ShutDown);
        }
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let started = ReplayScheduler::start(self.config.replay_interval(), move || {
            if let Err(e) = inner.start_replay().wait() {
                warn!(error = %e, "Scheduled replay pass did not complete");
            }
        })
        .map_err(BatchlogError::Spawn)?;

        *scheduler = Some(started);
        info!(
            interval_ms = self.config.replay_interval_ms,
            "Batch log replay scheduled"
        );
        Ok(())
    }

    /// Whether the periodic scheduler is running
    pub fn is_scheduled(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .map_or(false, |s| s.is_running())
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stop the scheduler, cancel and await any in-flight pass, stop the
    /// apply workers and flush the store.
    ///
    /// Apply workers get one apply timeout to finish. Workers stuck in the
    /// write path past that are detached rather than joined.
    ///
    /// Idempotent. Later submissions and replays fail with `ShutDown`.
    pub fn shutdown(&self) -> Result<(), BatchlogError> {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down batch log manager");

        let in_flight = self.inner.in_flight.lock().clone();
        if let Some(handle) = in_flight {
            handle.cancel();
            if let Err(e) = handle.wait() {
                warn!(pass = handle.pass(), error = %e, "Replay pass ended abnormally");
            }
        }

        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }

        let detached = self.inner.ctx.pool.shutdown(self.config.apply_timeout());
        if detached > 0 {
            warn!(detached, "Left apply workers running past shutdown");
        }
        self.inner.ctx.store.flush()?;
        Ok(())
    }
}

impl Drop for BatchlogManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Batch log shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for BatchlogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchlogManager")
            .field("metrics", &self.metrics())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlog_core::{TableRef, WriteResult};
    use batchlog_durability::{CodecVersion, MemoryBatchStore};
    use std::time::Duration;

    struct Accept;

    impl WritePath for Accept {
        fn apply(&self, _mutation: &Mutation, _timestamp: Timestamp) -> WriteResult<()> {
            Ok(())
        }
    }

    fn manager() -> BatchlogManager {
        BatchlogManager::new(
            BatchlogConfig::default(),
            Arc::new(MemoryBatchStore::new()),
            Arc::new(Accept),
        )
        .unwrap()
    }

    fn batch() -> Vec<Mutation> {
        vec![Mutation::new(TableRef::new("ks", "t"), b"k".to_vec()).upsert("c", "v", b"x".to_vec())]
    }

    #[test]
    fn test_submit_persists_current_version() {
        let manager = manager();
        let ts = Timestamp::from_micros(42);
        let entry = manager.submit(&batch(), ts).unwrap();

        assert_eq!(entry.version, CodecVersion::CURRENT);
        assert_eq!(entry.write_timestamp, ts);
        assert_eq!(manager.store().get(&entry.id), Some(entry.clone()));
        assert_eq!(
            manager.codec().decode(&entry.payload, entry.version).unwrap(),
            batch()
        );
        assert_eq!(manager.count_all_batches().unwrap(), 1);
        assert_eq!(manager.get_total_batches_seen(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let manager = manager();
        let entry = manager.submit(&batch(), Timestamp::now()).unwrap();
        manager.remove(&entry.id).unwrap();
        manager.remove(&entry.id).unwrap();
        assert_eq!(manager.count_all_batches().unwrap(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BatchlogConfig {
            apply_workers: 0,
            ..BatchlogConfig::default()
        };
        let result = BatchlogManager::new(config, Arc::new(MemoryBatchStore::new()), Arc::new(Accept));
        assert!(matches!(result, Err(BatchlogError::Config(_))));
    }

    #[test]
    fn test_shutdown_rejects_further_work() {
        let manager = manager();
        manager.shutdown().unwrap();
        manager.shutdown().unwrap();

        assert!(matches!(
            manager.submit(&batch(), Timestamp::now()),
            Err(BatchlogError::ShutDown)
        ));
        assert!(matches!(manager.start(), Err(BatchlogError::ShutDown)));
        assert_eq!(manager.start_replay().wait(), Err(ReplayError::ShutDown));
    }

    #[test]
    fn test_start_is_idempotent() {
        let manager = manager();
        manager.start().unwrap();
        manager.start().unwrap();
        assert!(manager.is_scheduled());
        manager.shutdown().unwrap();
        assert!(!manager.is_scheduled());
    }

    #[test]
    fn test_finished_pass_is_not_rejoined() {
        let manager = manager();
        let first = manager.start_replay();
        first.wait().unwrap();
        let second = manager.start_replay();
        assert!(!first.same_pass(&second));
        assert_eq!(second.wait_timeout(Duration::from_secs(10)).unwrap().unwrap().pass, 2);
    }
}
