//! One replay pass
//!
//! A pass is a single bounded scan over the entries visible when it starts.
//! It never loops waiting for new entries and never retries within itself:
//! anything that fails is left in the log for the next pass.
//!
//! Per entry:
//! 1. Skip it if it is younger than the replay timeout.
//! 2. Decode the payload with the codec registered for its version. An
//!    undecodable entry is kept and costs no throttle budget.
//! 3. Wait for throttle budget.
//! 4. Apply every mutation at the entry's write timestamp, through the apply
//!    pool, under one deadline. Mutations for tables truncated at or after
//!    the write timestamp are dropped.
//! 5. Only if every mutation was acknowledged, delete the entry.
//!
//! Cancellation is checked between entries, so an entry is either fully
//! applied and deleted or not touched at all by a cancelled pass.

use crate::apply_pool::ApplyPool;
use crate::error::ReplayError;
use crate::handle::CancelToken;
use crate::metrics::{ReplayCounters, ReplayReport};
use batchlog_core::{Mutation, Timestamp, WriteError, WritePath};
use batchlog_durability::{BatchEntry, BatchLogStore, MutationCodec};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing knobs for a pass
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReplaySettings {
    pub replay_timeout: Duration,
    pub apply_timeout: Duration,
    pub throttle_bytes_per_sec: Option<u64>,
}

/// Everything a pass needs, shared between the manager and pass threads
pub(crate) struct ReplayContext {
    pub store: Arc<dyn BatchLogStore>,
    pub codec: Arc<MutationCodec>,
    pub write_path: Arc<dyn WritePath>,
    pub pool: ApplyPool,
    pub counters: ReplayCounters,
    pub settings: ReplaySettings,
}

/// Paces replay by payload bytes.
///
/// The first entry goes through immediately; each later entry waits until
/// the bytes replayed so far fit the rate.
#[derive(Debug)]
struct Throttle {
    bytes_per_sec: u64,
    started: Instant,
    consumed: u64,
}

impl Throttle {
    fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec.max(1),
            started: Instant::now(),
            consumed: 0,
        }
    }

    /// Reserve `bytes` and return how long to wait before using them
    fn acquire(&mut self, bytes: u64) -> Duration {
        let due = Duration::from_secs_f64(self.consumed as f64 / self.bytes_per_sec as f64);
        self.consumed += bytes;
        due.saturating_sub(self.started.elapsed())
    }
}

/// Run one pass to completion or cancellation.
pub(crate) fn run_pass(ctx: &ReplayContext, pass: u64, cancel: &CancelToken) -> ReplayReport {
    let started = Instant::now();
    let mut report = ReplayReport {
        pass,
        ..ReplayReport::default()
    };
    let mut throttle = ctx.settings.throttle_bytes_per_sec.map(Throttle::new);

    debug!(pass, pending = ctx.store.count(), "Replay pass started");

    for entry in ctx.store.scan_all() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        report.scanned += 1;

        if !entry.is_eligible(Timestamp::now(), ctx.settings.replay_timeout) {
            report.not_yet_eligible += 1;
            continue;
        }

        let mutations = match ctx.codec.decode(&entry.payload, entry.version) {
            Ok(mutations) => mutations,
            Err(e) => {
                ctx.counters.record_decode_failure();
                report.decode_failures += 1;
                warn!(
                    batch_id = %entry.id,
                    version = %entry.version,
                    error = %e,
                    "Skipping batch with undecodable payload"
                );
                continue;
            }
        };

        if let Some(throttle) = throttle.as_mut() {
            let wait = throttle.acquire(entry.payload.len() as u64);
            if !wait.is_zero() && cancel.sleep(wait) {
                report.cancelled = true;
                break;
            }
        }

        match apply_entry(ctx, &entry, mutations) {
            Ok(truncated) => match ctx.store.delete(&entry.id) {
                Ok(()) => {
                    ctx.counters.record_replayed();
                    ctx.counters.record_truncated(truncated);
                    report.replayed += 1;
                    report.truncated_skipped += truncated;
                    report.bytes_replayed += entry.payload.len() as u64;
                    debug!(batch_id = %entry.id, truncated, "Replayed batch");
                }
                Err(e) => {
                    report.delete_failures += 1;
                    warn!(
                        batch_id = %entry.id,
                        error = %e,
                        "Batch applied but could not be deleted, will replay again"
                    );
                }
            },
            Err(e) => {
                ctx.counters.record_apply_failure();
                report.apply_failures += 1;
                warn!(
                    batch_id = %entry.id,
                    error = %e,
                    "Batch replay failed, keeping it for the next pass"
                );
            }
        }
    }

    report.elapsed = started.elapsed();
    ctx.counters.record_pass();
    info!(
        pass,
        scanned = report.scanned,
        replayed = report.replayed,
        not_yet_eligible = report.not_yet_eligible,
        retained = report.retained(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Replay pass finished"
    );
    report
}

/// Apply one entry's decoded mutations. Returns the number of truncated
/// mutations dropped.
fn apply_entry(
    ctx: &ReplayContext,
    entry: &BatchEntry,
    mutations: Vec<Mutation>,
) -> Result<u64, ReplayError> {
    let (truncated, live): (Vec<_>, Vec<_>) = mutations.into_iter().partition(|m| {
        ctx.write_path
            .truncated_at(&m.table)
            .map_or(false, |at| at >= entry.write_timestamp)
    });
    for m in &truncated {
        debug!(batch_id = %entry.id, table = %m.table, "Dropping mutation for truncated table");
    }

    let (tx, rx) = mpsc::channel();
    let mut pending = 0usize;
    for mutation in live {
        let write_path = Arc::clone(&ctx.write_path);
        let tx = tx.clone();
        let timestamp = entry.write_timestamp;
        ctx.pool
            .submit(move || {
                // Receiver is gone if the attempt already timed out
                let _ = tx.send(write_path.apply(&mutation, timestamp));
            })
            .map_err(|_| ReplayError::Backpressure)?;
        pending += 1;
    }
    drop(tx);

    let started = Instant::now();
    let deadline = started + ctx.settings.apply_timeout;
    while pending > 0 {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Ok(())) => pending -= 1,
            Ok(Err(e)) => return Err(ReplayError::Apply(e)),
            Err(RecvTimeoutError::Timeout) => {
                return Err(ReplayError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    pending,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ReplayError::Apply(WriteError::Other(
                    "apply job ended without acknowledging".to_string(),
                )))
            }
        }
    }

    Ok(truncated.len() as u64)
}
