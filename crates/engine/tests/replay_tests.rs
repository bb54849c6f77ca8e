//! Replay behaviour tests
//!
//! Each test drives a `BatchlogManager` over an in-memory store and a
//! `TableStore` write path (optionally wrapped to inject faults), then checks
//! both the batch log and the replica state:
//!
//! - Only entries past the replay timeout are replayed
//! - Replayed entries are deleted and counted exactly once
//! - Failed entries (decode, apply, timeout) stay for the next pass
//! - Replay composes with last-write-wins and truncation

use batchlog_core::{
    BatchId, Mutation, TableRef, Timestamp, WriteError, WritePath, WriteResult,
};
use batchlog_durability::{
    BatchEntry, BatchLogStore, CodecVersion, MemoryBatchStore, MutationCodec,
};
use batchlog_engine::{BatchlogConfig, BatchlogManager};
use batchlog_storage::TableStore;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn standard1() -> TableRef {
    TableRef::new("Keyspace1", "Standard1")
}

fn standard2() -> TableRef {
    TableRef::new("Keyspace1", "Standard2")
}

fn replica() -> Arc<TableStore> {
    let store = Arc::new(TableStore::new());
    store.create_table(standard1());
    store.create_table(standard2());
    store
}

fn config() -> BatchlogConfig {
    BatchlogConfig {
        replay_throttle_kib: 0,
        apply_timeout_ms: 10_000,
        ..BatchlogConfig::default()
    }
}

fn manager_with(
    config: BatchlogConfig,
    write_path: Arc<dyn WritePath>,
) -> (BatchlogManager, Arc<MemoryBatchStore>) {
    let store = Arc::new(MemoryBatchStore::new());
    let manager = BatchlogManager::new(config, store.clone(), write_path).unwrap();
    (manager, store)
}

fn upsert(table: TableRef, key: &str, value: &[u8]) -> Mutation {
    Mutation::new(table, key.as_bytes().to_vec()).upsert("", "val", value.to_vec())
}

/// Timestamp old enough to be eligible under the default config
fn aged(config: &BatchlogConfig) -> Timestamp {
    Timestamp::now().saturating_sub(config.replay_timeout() * 2)
}

fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Write path whose apply blocks until the gate opens.
struct GatedWritePath {
    inner: Arc<TableStore>,
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedWritePath {
    fn new(inner: Arc<TableStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
        })
    }

    fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

impl WritePath for GatedWritePath {
    fn apply(&self, mutation: &Mutation, timestamp: Timestamp) -> WriteResult<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        drop(open);
        self.inner.apply(mutation, timestamp)
    }
}

/// Write path that sleeps before every apply.
struct SlowWritePath {
    inner: Arc<TableStore>,
    delay_ms: AtomicU64,
}

impl WritePath for SlowWritePath {
    fn apply(&self, mutation: &Mutation, timestamp: Timestamp) -> WriteResult<()> {
        std::thread::sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst)));
        self.inner.apply(mutation, timestamp)
    }
}

#[test]
fn test_replay_aged_half_of_1000_batches() {
    let config = config();
    let replica = replica();
    let (manager, _) = manager_with(config.clone(), replica.clone());

    for i in 0..1000 {
        let ts = if i < 500 { aged(&config) } else { Timestamp::MAX };
        let mutation = upsert(standard1(), &i.to_string(), &(i as u32).to_be_bytes());
        manager.submit(&[mutation], ts).unwrap();
    }

    assert_eq!(manager.count_all_batches().unwrap(), 1000);
    assert_eq!(manager.get_total_batches_replayed(), 0);

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.scanned, 1000);
    assert_eq!(report.replayed, 500);
    assert_eq!(report.not_yet_eligible, 500);

    assert_eq!(manager.count_all_batches().unwrap(), 500);
    assert_eq!(manager.get_total_batches_replayed(), 500);

    for i in 0..1000 {
        let value = replica.get(&standard1(), i.to_string().as_bytes(), "", "val");
        if i < 500 {
            assert_eq!(value, Some((i as u32).to_be_bytes().to_vec()), "key {}", i);
        } else {
            assert_eq!(value, None, "key {} should not be replayed", i);
        }
    }
}

#[test]
fn test_young_entries_untouched() {
    let replica = replica();
    let (manager, store) = manager_with(config(), replica.clone());

    let entries: Vec<BatchEntry> = (0..20)
        .map(|i| {
            manager
                .submit(&[upsert(standard1(), &i.to_string(), b"v")], Timestamp::now())
                .unwrap()
        })
        .collect();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 0);
    assert_eq!(report.not_yet_eligible, 20);
    assert_eq!(manager.count_all_batches().unwrap(), 20);
    for entry in &entries {
        assert_eq!(store.get(&entry.id).as_ref(), Some(entry));
    }
    assert_eq!(replica.applied_count(), 0);
}

#[test]
fn test_directly_delivered_batch_not_replayed() {
    let replica = replica();
    let config = BatchlogConfig {
        replay_timeout_ms: 0,
        ..config()
    };
    let (manager, _) = manager_with(config, replica.clone());

    let entry = manager
        .submit(&[upsert(standard1(), "k", b"v")], Timestamp::now())
        .unwrap();
    manager.remove(&entry.id).unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(replica.applied_count(), 0);
    assert_eq!(manager.get_total_batches_replayed(), 0);
}

#[test]
fn test_replay_after_crash_between_apply_and_delete() {
    let config = config();
    let replica = replica();
    let (manager, store) = manager_with(config.clone(), replica.clone());

    let ts = aged(&config);
    let mutations = [upsert(standard1(), "k", b"logged")];
    let entry = manager.submit(&mutations, ts).unwrap();

    // First delivery happened, but the process died before the delete
    replica.apply(&mutations[0], ts).unwrap();
    // A later write to the same cell
    replica
        .apply(&upsert(standard1(), "k", b"newer"), ts.saturating_add(Duration::from_millis(1)))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 1);
    assert!(store.get(&entry.id).is_none());
    assert_eq!(
        replica.get(&standard1(), b"k", "", "val"),
        Some(b"newer".to_vec()),
        "replay must not clobber a newer write"
    );

    // Put the entry back and replay it a second time
    store.put(entry).unwrap();
    manager.start_replay().wait().unwrap();
    assert_eq!(replica.get(&standard1(), b"k", "", "val"), Some(b"newer".to_vec()));
    assert_eq!(manager.get_total_batches_replayed(), 2);
}

#[test]
fn test_failed_entry_retained_and_retried() {
    let config = config();
    let replica = Arc::new(TableStore::new());
    replica.create_table(standard1());
    let (manager, store) = manager_with(config.clone(), replica.clone());

    // Standard2 does not exist yet, so half of this batch fails
    let entry = manager
        .submit(
            &[upsert(standard1(), "a", b"1"), upsert(standard2(), "b", b"2")],
            aged(&config),
        )
        .unwrap();
    let ok = manager
        .submit(&[upsert(standard1(), "c", b"3")], aged(&config))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(report.apply_failures, 1);
    assert_eq!(store.get(&entry.id).as_ref(), Some(&entry));
    assert!(store.get(&ok.id).is_none());
    assert_eq!(manager.metrics().apply_failures, 1);

    replica.create_table(standard2());
    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(manager.count_all_batches().unwrap(), 0);
    assert_eq!(replica.get(&standard2(), b"b", "", "val"), Some(b"2".to_vec()));
    assert_eq!(manager.get_total_batches_replayed(), 2);
}

#[test]
fn test_undecodable_entries_retained_pass_continues() {
    let config = config();
    let replica = replica();
    let (manager, store) = manager_with(config.clone(), replica.clone());

    let unknown_version =
        BatchEntry::new(BatchId::new(), aged(&config), CodecVersion(99), vec![1, 2, 3]);
    let garbage =
        BatchEntry::new(BatchId::new(), aged(&config), CodecVersion::CURRENT, vec![0xC1; 8]);
    store.put(unknown_version.clone()).unwrap();
    store.put(garbage.clone()).unwrap();
    let good = manager
        .submit(&[upsert(standard1(), "k", b"v")], aged(&config))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.decode_failures, 2);
    assert_eq!(report.replayed, 1);
    assert!(store.get(&good.id).is_none());
    assert_eq!(store.get(&unknown_version.id), Some(unknown_version));
    assert_eq!(store.get(&garbage.id), Some(garbage));
    assert_eq!(manager.metrics().decode_failures, 2);
}

#[test]
fn test_legacy_version_entries_replayed() {
    let config = config();
    let replica = replica();
    let (manager, store) = manager_with(config.clone(), replica.clone());

    let mutations = [upsert(standard1(), "old", b"bincode")];
    let payload = MutationCodec::default()
        .encode(&mutations, CodecVersion::V1)
        .unwrap();
    store
        .put(BatchEntry::new(BatchId::new(), aged(&config), CodecVersion::V1, payload))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(
        replica.get(&standard1(), b"old", "", "val"),
        Some(b"bincode".to_vec())
    );
}

#[test]
fn test_apply_timeout_fails_entry_for_this_pass() {
    let replica = replica();
    let slow = Arc::new(SlowWritePath {
        inner: replica.clone(),
        delay_ms: AtomicU64::new(500),
    });
    let config = BatchlogConfig {
        apply_timeout_ms: 50,
        ..config()
    };
    let (manager, store) = manager_with(config.clone(), slow.clone());

    let entry = manager
        .submit(&[upsert(standard1(), "k", b"v")], aged(&config))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.apply_failures, 1);
    assert_eq!(report.replayed, 0);
    assert!(store.get(&entry.id).is_some());

    slow.delay_ms.store(0, Ordering::SeqCst);
    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 1);
    assert!(store.get(&entry.id).is_none());
}

#[test]
fn test_concurrent_triggers_join_one_pass() {
    let replica = replica();
    let gated = GatedWritePath::new(replica.clone());
    let config = config();
    let (manager, _) = manager_with(config.clone(), gated.clone());

    for i in 0..3 {
        manager
            .submit(&[upsert(standard1(), &i.to_string(), b"v")], aged(&config))
            .unwrap();
    }

    let first = manager.start_replay();
    wait_for("first apply", || gated.entered.load(Ordering::SeqCst) >= 1);

    let joined: Vec<_> = (0..4).map(|_| manager.start_replay()).collect();
    for handle in &joined {
        assert!(handle.same_pass(&first));
        assert!(!handle.is_finished());
    }

    gated.release();
    let report = first.wait().unwrap();
    for handle in &joined {
        assert_eq!(handle.wait().unwrap(), report);
    }

    assert_eq!(report.replayed, 3);
    assert_eq!(manager.get_total_batches_replayed(), 3);
    assert_eq!(replica.applied_count(), 3);
    assert_eq!(manager.metrics().replay_passes, 1);

    let next = manager.start_replay();
    assert!(!next.same_pass(&first));
    assert_eq!(next.wait().unwrap().replayed, 0);
}

#[test]
fn test_cancel_leaves_remaining_entries_untouched() {
    let replica = replica();
    let gated = GatedWritePath::new(replica.clone());
    let config = BatchlogConfig {
        apply_workers: 1,
        ..config()
    };
    let (manager, _) = manager_with(config.clone(), gated.clone());

    for i in 0..5 {
        manager
            .submit(&[upsert(standard1(), &i.to_string(), b"v")], aged(&config))
            .unwrap();
    }

    let handle = manager.start_replay();
    wait_for("first apply", || gated.entered.load(Ordering::SeqCst) >= 1);
    handle.cancel();
    gated.release();

    let report = handle.wait().unwrap();
    assert!(report.cancelled);
    assert_eq!(report.replayed, 1, "the entry in progress completes");
    assert_eq!(manager.count_all_batches().unwrap(), 4);
    assert_eq!(replica.applied_count(), 1);
}

#[test]
fn test_truncated_table_mutations_skipped() {
    let replica = replica();
    let config = config();
    let (manager, _) = manager_with(config, replica.clone());

    let base = Timestamp::now().saturating_sub(Duration::from_secs(10));
    for i in 0..1000u64 {
        let ts = base.saturating_add(Duration::from_millis(i));
        let key = i.to_string();
        manager
            .submit(
                &[upsert(standard1(), &key, b"1"), upsert(standard2(), &key, b"2")],
                ts,
            )
            .unwrap();
    }

    // Standard2 truncated between the 500th and 501st batch
    replica
        .truncate(&standard2(), base.saturating_add(Duration::from_micros(499_500)))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 1000);
    assert_eq!(report.truncated_skipped, 500);
    assert_eq!(manager.metrics().truncated_skipped, 500);
    assert_eq!(manager.count_all_batches().unwrap(), 0);

    for i in 0..1000u64 {
        let key = i.to_string();
        assert_eq!(
            replica.get(&standard1(), key.as_bytes(), "", "val"),
            Some(b"1".to_vec())
        );
        let expected = if i < 500 { None } else { Some(b"2".to_vec()) };
        assert_eq!(replica.get(&standard2(), key.as_bytes(), "", "val"), expected, "key {}", i);
    }
}

#[test]
fn test_apply_errors_are_not_write_path_errors_for_submitters() {
    // Submission never touches the write path, so a broken replica only
    // shows up in replay counters
    struct Broken;
    impl WritePath for Broken {
        fn apply(&self, _: &Mutation, _: Timestamp) -> WriteResult<()> {
            Err(WriteError::Unavailable("replica down".to_string()))
        }
    }

    let config = config();
    let (manager, _) = manager_with(config.clone(), Arc::new(Broken));
    manager
        .submit(&[upsert(standard1(), "k", b"v")], aged(&config))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.apply_failures, 1);
    assert_eq!(manager.count_all_batches().unwrap(), 1);
    assert_eq!(manager.get_total_batches_seen(), 1);
}

#[test]
fn test_throttle_paces_replay() {
    let replica = replica();
    let config = BatchlogConfig {
        replay_throttle_kib: 1,
        ..config()
    };
    let (manager, _) = manager_with(config.clone(), replica);

    // Three 600-byte payloads at 1 KiB/s: the third waits for ~1.2 KB of budget
    for i in 0..3 {
        manager
            .submit(&[upsert(standard1(), &i.to_string(), &[7u8; 600])], aged(&config))
            .unwrap();
    }

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.replayed, 3);
    assert!(report.elapsed >= Duration::from_millis(900), "{:?}", report.elapsed);
}

/// Write path that never comes back within any test's lifetime.
struct HungWritePath;

impl WritePath for HungWritePath {
    fn apply(&self, _mutation: &Mutation, _timestamp: Timestamp) -> WriteResult<()> {
        std::thread::sleep(Duration::from_secs(3600));
        Ok(())
    }
}

#[test]
fn test_shutdown_returns_with_hung_write_path() {
    let config = BatchlogConfig {
        apply_timeout_ms: 50,
        ..config()
    };
    let (manager, _) = manager_with(config.clone(), Arc::new(HungWritePath));
    manager
        .submit(&[upsert(standard1(), "k", b"v")], aged(&config))
        .unwrap();

    let report = manager.start_replay().wait().unwrap();
    assert_eq!(report.apply_failures, 1);
    assert_eq!(manager.count_all_batches().unwrap(), 1);

    let started = Instant::now();
    manager.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    assert!(manager.is_shut_down());
}
