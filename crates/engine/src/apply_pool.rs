//! Worker pool applying replayed mutations.
//!
//! A fixed set of threads draining a bounded FIFO queue. The replay pass
//! hands each mutation of an entry to the pool and waits for the
//! acknowledgements with a deadline, so one slow replica stalls at most that
//! entry's attempt, never the worker that runs the pass.
//!
//! Shutdown is bounded: a worker stuck in an apply that never returns is
//! detached once the grace period runs out instead of blocking its owner.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Error returned when the pool queue is full or the pool is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("apply pool is full or shut down")]
pub struct BackpressureError;

/// Pool metrics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Jobs waiting in the queue.
    pub queue_depth: usize,
    /// Jobs currently running.
    pub active_jobs: usize,
    /// Jobs finished since the pool was created.
    pub jobs_completed: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Job = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    /// Workers that have not exited their loop
    running_workers: AtomicUsize,
    queue_depth: AtomicUsize,
    active_jobs: AtomicUsize,
    max_queue_depth: usize,
    jobs_completed: AtomicU64,
}

struct Worker {
    handle: JoinHandle<()>,
    /// Set by the worker as it leaves its loop
    exited: Arc<AtomicBool>,
}

/// Fixed-size pool of apply workers.
pub struct ApplyPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<Worker>>,
    num_threads: usize,
}

impl ApplyPool {
    /// Spawn `num_threads` workers named `batchlog-apply-N`.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if a thread could not be created. Workers
    /// spawned before the failure are shut down.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> std::io::Result<Self> {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            running_workers: AtomicUsize::new(0),
            queue_depth: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            max_queue_depth,
            jobs_completed: AtomicU64::new(0),
        });

        let pool = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };

        for i in 0..num_threads {
            let inner = Arc::clone(&pool.inner);
            let exited = Arc::new(AtomicBool::new(false));
            let worker_exited = Arc::clone(&exited);
            pool.inner.running_workers.fetch_add(1, Ordering::AcqRel);
            let spawned = std::thread::Builder::new()
                .name(format!("batchlog-apply-{}", i))
                .spawn(move || worker_loop(&inner, &worker_exited));
            match spawned {
                Ok(handle) => pool.workers.lock().push(Worker { handle, exited }),
                Err(e) => {
                    pool.inner.running_workers.fetch_sub(1, Ordering::AcqRel);
                    pool.shutdown(Duration::ZERO);
                    return Err(e);
                }
            }
        }

        Ok(pool)
    }

    /// Queue a job.
    ///
    /// Returns `Err(BackpressureError)` if the queue is at capacity or the
    /// pool has been shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), BackpressureError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(BackpressureError);
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                return Err(BackpressureError);
            }
            queue.push_back(Box::new(job));
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }

        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until all queued and running jobs have finished or `deadline`
    /// passes. Returns whether the pool went idle.
    ///
    /// Workers keep running afterwards.
    pub fn drain_until(&self, deadline: Instant) -> bool {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_jobs.load(Ordering::Acquire) > 0
        {
            if self.inner.drain_cond.wait_until(&mut queue, deadline).timed_out() {
                return false;
            }
        }
        true
    }

    /// Let queued work finish for up to `grace`, then stop the workers.
    ///
    /// Jobs still queued when the grace period ends are dropped. Workers
    /// still inside a job at that point are detached; they exit on their own
    /// once the job returns. Returns the number of detached workers.
    pub fn shutdown(&self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        if !self.inner.shutdown.load(Ordering::Acquire) && !self.drain_until(deadline) {
            debug!("Apply pool did not go idle within the shutdown grace period");
        }

        self.inner.shutdown.store(true, Ordering::Release);

        // Notify under the queue lock so a worker between its shutdown check
        // and its wait cannot miss the wakeup
        {
            let mut queue = self.inner.queue.lock();
            let dropped = queue.len();
            queue.clear();
            self.inner.queue_depth.store(0, Ordering::Release);
            if dropped > 0 {
                warn!(dropped, "Dropped queued apply jobs at shutdown");
            }
            self.inner.work_ready.notify_all();

            // Idle workers leave as soon as they see the flag
            while self.inner.running_workers.load(Ordering::Acquire)
                > self.inner.active_jobs.load(Ordering::Acquire)
            {
                self.inner.drain_cond.wait(&mut queue);
            }
            while self.inner.running_workers.load(Ordering::Acquire) > 0 {
                if self.inner.drain_cond.wait_until(&mut queue, deadline).timed_out() {
                    break;
                }
            }
        }

        let mut detached = 0;
        for worker in self.workers.lock().drain(..) {
            if worker.exited.load(Ordering::Acquire) {
                let _ = worker.handle.join();
            } else {
                detached += 1;
            }
        }
        if detached > 0 {
            warn!(
                detached,
                grace_ms = grace.as_millis() as u64,
                "Apply workers still busy at shutdown, detaching them"
            );
        }
        detached
    }

    /// Snapshot of pool metrics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_jobs: self.inner.active_jobs.load(Ordering::Relaxed),
            jobs_completed: self.inner.jobs_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl std::fmt::Debug for ApplyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyPool").field("stats", &self.stats()).finish()
    }
}

/// Decrements `active_jobs` and wakes drain waiters on drop, including
/// when the job panicked.
struct ActiveJobGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveJobGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_jobs.fetch_sub(1, Ordering::Release);
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);

        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner, exited: &AtomicBool) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_jobs.fetch_add(1, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    exited.store(true, Ordering::Release);
                    inner.running_workers.fetch_sub(1, Ordering::AcqRel);
                    inner.drain_cond.notify_all();
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                "apply job panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_submit_and_drain() {
        let pool = ApplyPool::new(2, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        assert!(pool.drain_until(soon()));
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(pool.stats().jobs_completed, 10);
        assert_eq!(pool.shutdown(Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_fifo_on_single_worker() {
        let pool = ApplyPool::new(1, 64).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            pool.submit(move || o.lock().push(i)).unwrap();
        }
        assert!(pool.drain_until(soon()));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.shutdown(Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_backpressure() {
        let pool = ApplyPool::new(1, 1).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        // Occupy the worker
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();
        while pool.stats().active_jobs == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        pool.submit(|| {}).unwrap();
        assert!(pool.submit(|| {}).is_err());

        barrier.wait();
        assert!(pool.drain_until(soon()));
        assert_eq!(pool.shutdown(Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let pool = ApplyPool::new(1, 64).unwrap();
        pool.submit(|| panic!("boom")).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        pool.submit(move || r.store(true, Ordering::SeqCst)).unwrap();

        assert!(pool.drain_until(soon()));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(pool.shutdown(Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let pool = ApplyPool::new(1, 64).unwrap();
        assert_eq!(pool.shutdown(Duration::from_secs(5)), 0);
        assert!(pool.submit(|| {}).is_err());
    }

    #[test]
    fn test_shutdown_detaches_stuck_worker() {
        let pool = ApplyPool::new(2, 64).unwrap();
        let release = Arc::new(Barrier::new(2));
        let r = Arc::clone(&release);
        pool.submit(move || {
            r.wait();
        })
        .unwrap();
        while pool.stats().active_jobs == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        assert_eq!(pool.shutdown(Duration::from_millis(50)), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(pool.submit(|| {}).is_err());

        // The detached worker finishes its job and exits on its own
        release.wait();
        let deadline = soon();
        while pool.inner.running_workers.load(Ordering::Acquire) > 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_shutdown_lets_queued_work_finish_within_grace() {
        let pool = ApplyPool::new(1, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(2));
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        assert_eq!(pool.shutdown(Duration::from_secs(5)), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }
}
