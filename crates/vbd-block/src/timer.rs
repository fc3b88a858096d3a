//! Cancellable deferred callback used for simulated media invalidation.
//!
//! One worker thread per timer sleeps until the armed deadline and then runs
//! the callback with the timer lock released. [`InvalidationTimer::cancel_sync`]
//! returns only once the callback is guaranteed not to be running, so a
//! caller may take any lock the callback takes right after cancelling.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use vbd_error::Result;

type Callback = Box<dyn Fn() + Send + 'static>;

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    firing: bool,
    fired: u64,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// Deferred, cancellable, re-armable one-shot timer.
pub struct InvalidationTimer {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl InvalidationTimer {
    /// Start the worker thread. The timer begins disarmed.
    pub fn spawn(name: &str, callback: impl Fn() + Send + 'static) -> Result<Self> {
        let shared = Arc::new(TimerShared::default());
        let worker_shared = Arc::clone(&shared);
        let callback: Callback = Box::new(callback);
        let worker = std::thread::Builder::new()
            .name(format!("{name}-invalidate"))
            .spawn(move || run_worker(&worker_shared, &callback))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Arm (or re-arm) the timer to fire once after `delay`.
    pub fn arm(&self, delay: Duration) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(Instant::now() + delay);
        drop(state);
        self.shared.condvar.notify_all();
        trace!(delay_ms = delay.as_millis(), "invalidation timer armed");
    }

    /// Disarm the timer and wait out a callback that is already running.
    ///
    /// Returns whether a pending (not yet fired) deadline was cancelled.
    /// Must not be called while holding a lock the callback takes.
    pub fn cancel_sync(&self) -> bool {
        let mut state = self.shared.state.lock();
        let was_pending = state.deadline.take().is_some();
        while state.firing {
            self.shared.condvar.wait(&mut state);
        }
        drop(state);
        self.shared.condvar.notify_all();
        was_pending
    }

    /// Clear a pending deadline without waiting for a running callback.
    ///
    /// Safe to call while holding a lock the callback takes; the worker
    /// never holds the timer lock while the callback runs.
    pub fn disarm(&self) -> bool {
        self.shared.state.lock().deadline.take().is_some()
    }

    /// Whether a deadline is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    /// Number of times the callback has completed.
    #[must_use]
    pub fn fired_count(&self) -> u64 {
        self.shared.state.lock().fired
    }
}

impl std::fmt::Debug for InvalidationTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationTimer")
            .field("state", &*self.shared.state.lock())
            .finish_non_exhaustive()
    }
}

impl Drop for InvalidationTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
        }
        self.shared.condvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: &TimerShared, callback: &Callback) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let deadline = state.deadline;
        match deadline {
            None => shared.condvar.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => fire(shared, &mut state, callback),
            Some(deadline) => {
                let _ = shared.condvar.wait_until(&mut state, deadline);
            }
        }
    }
    debug!("invalidation timer worker stopped");
}

fn fire(shared: &TimerShared, state: &mut MutexGuard<'_, TimerState>, callback: &Callback) {
    state.deadline = None;
    state.firing = true;
    MutexGuard::unlocked(state, || callback());
    state.firing = false;
    state.fired += 1;
    shared.condvar.notify_all();
}
