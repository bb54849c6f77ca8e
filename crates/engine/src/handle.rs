//! Awaitable, cancellable handle to a replay pass.
//!
//! Every caller that joins the same pass holds a clone of the same handle and
//! observes the same report.

use crate::error::ReplayError;
use crate::metrics::ReplayReport;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag with an interruptible sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Fresh, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake any sleeper
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.state;
        *lock.lock() = true;
        cvar.notify_all();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.state.0.lock()
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the token is cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.state;
        let deadline = Instant::now() + duration;
        let mut cancelled = lock.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

type PassResult = Result<ReplayReport, ReplayError>;

#[derive(Debug)]
struct HandleState {
    pass: u64,
    result: Mutex<Option<PassResult>>,
    done: Condvar,
    cancel: CancelToken,
}

/// Handle to a replay pass started by
/// [`BatchlogManager::start_replay`](crate::BatchlogManager::start_replay).
///
/// Cloning is cheap; all clones refer to the same pass.
#[derive(Debug, Clone)]
pub struct ReplayHandle {
    state: Arc<HandleState>,
}

impl ReplayHandle {
    pub(crate) fn new(pass: u64) -> Self {
        Self {
            state: Arc::new(HandleState {
                pass,
                result: Mutex::new(None),
                done: Condvar::new(),
                cancel: CancelToken::new(),
            }),
        }
    }

    /// Handle that is already finished with `result`
    pub(crate) fn finished(pass: u64, result: PassResult) -> Self {
        let handle = Self::new(pass);
        handle.complete(result);
        handle
    }

    pub(crate) fn complete(&self, result: PassResult) {
        let mut slot = self.state.result.lock();
        if slot.is_none() {
            *slot = Some(result);
        }
        self.state.done.notify_all();
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.state.cancel
    }

    /// Sequence number of the pass this handle refers to
    pub fn pass(&self) -> u64 {
        self.state.pass
    }

    /// Whether two handles refer to the same pass
    pub fn same_pass(&self, other: &ReplayHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Whether the pass has finished
    pub fn is_finished(&self) -> bool {
        self.state.result.lock().is_some()
    }

    /// Ask the pass to stop after the entry it is working on.
    ///
    /// Entries already replayed stay deleted; the rest are untouched.
    pub fn cancel(&self) {
        self.state.cancel.cancel();
    }

    /// Block until the pass finishes.
    pub fn wait(&self) -> PassResult {
        let mut slot = self.state.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.state.done.wait(&mut slot);
        }
    }

    /// Block until the pass finishes or `timeout` elapses.
    ///
    /// Returns `None` on timeout; the pass keeps running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PassResult> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(result.clone());
            }
            if self.state.done.wait_until(&mut slot, deadline).timed_out() {
                return slot.as_ref().cloned();
            }
        }
    }
}
