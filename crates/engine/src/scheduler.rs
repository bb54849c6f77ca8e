//! Periodic replay scheduler
//!
//! A single background thread that triggers a replay pass every interval.
//! The pass itself goes through the manager's single-flight slot, so a
//! scheduled tick that lands while an out-of-band pass is running joins it
//! instead of starting a second one.
//!
//! # Thread Lifecycle
//!
//! - `shutdown` flag plus condvar wake the thread early
//! - `shutdown()` joins the thread
//! - `Drop` performs the same shutdown

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

struct SchedulerSignal {
    shutdown: Mutex<bool>,
    wake: Condvar,
}

/// Background thread running `tick` on a fixed interval.
pub struct ReplayScheduler {
    signal: Arc<SchedulerSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl ReplayScheduler {
    /// Spawn the scheduler thread. The first tick fires after one interval.
    ///
    /// `tick` is expected to block until its pass completes; ticks never
    /// overlap.
    pub fn start(
        interval: Duration,
        tick: impl Fn() + Send + 'static,
    ) -> std::io::Result<Self> {
        let signal = Arc::new(SchedulerSignal {
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_signal = Arc::clone(&signal);
        let thread = std::thread::Builder::new()
            .name("batchlog-replay-scheduler".to_string())
            .spawn(move || run_loop(&thread_signal, interval, tick))?;

        debug!(interval_ms = interval.as_millis() as u64, "Replay scheduler started");
        Ok(Self {
            signal,
            thread: Mutex::new(Some(thread)),
            interval,
        })
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the scheduler thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some() && !*self.signal.shutdown.lock()
    }

    /// Stop the thread and wait for it. A tick in progress finishes first.
    pub fn shutdown(&self) {
        {
            let mut shutdown = self.signal.shutdown.lock();
            *shutdown = true;
            self.signal.wake.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
            debug!("Replay scheduler stopped");
        }
    }
}

impl Drop for ReplayScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ReplayScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayScheduler")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_loop(signal: &SchedulerSignal, interval: Duration, tick: impl Fn()) {
    loop {
        {
            let mut shutdown = signal.shutdown.lock();
            if !*shutdown {
                signal.wake.wait_for(&mut shutdown, interval);
            }
            if *shutdown {
                break;
            }
        }
        tick();
    }
}
