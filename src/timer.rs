//! Repeating timers that drive the tracker's tick.
//!
//! A timer invokes its callback once right after `start`, then once per
//! period until `stop`. Invocations never overlap: the next one is scheduled
//! only after the previous callback returned.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Result, TrackerError};

/// Callback invoked on every timer period.
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// A cancellable fixed-period loop.
pub trait RepeatingTimer: Send + Sync {
    /// Start invoking `callback`. Fails with [`TrackerError::TimerAlreadyStarted`]
    /// if the timer is running.
    fn start(&self, period: Duration, callback: TickCallback) -> Result<()>;

    /// Cancel future invocations. A callback already running completes.
    /// Safe to call when not started, and from inside the callback.
    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// [`RepeatingTimer`] backed by a task on a tokio runtime.
pub struct TokioTimer {
    runtime: Handle,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTimer {
    /// Timer spawning its loop on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Timer on the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| TrackerError::Runtime {
            message: e.to_string(),
        })?;
        Ok(Self::new(runtime))
    }
}

impl RepeatingTimer for TokioTimer {
    fn start(&self, period: Duration, callback: TickCallback) -> Result<()> {
        // Holding the slot lock keeps a concurrent stop() from clearing
        // `started` before the task is stored
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TrackerError::TimerAlreadyStarted);
        }

        debug!("[TokioTimer] Starting with period {:?}", period);
        *task = Some(self.runtime.spawn(async move {
            loop {
                callback();
                tokio::time::sleep(period).await;
            }
        }));
        Ok(())
    }

    fn stop(&self) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            debug!("[TokioTimer] Stopping");
            // Cancels at the next await, so a running callback finishes first
            task.abort();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`RepeatingTimer`] that only ticks when told to.
///
/// Tests call [`ManualTimer::fire`] to run exactly one tick.
#[derive(Default)]
pub struct ManualTimer {
    callback: Mutex<Option<TickCallback>>,
    period: Mutex<Option<Duration>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one tick. Returns `false` if the timer is not running.
    pub fn fire(&self) -> bool {
        // Clone out so the callback may call `stop()` on this timer
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Run up to `count` ticks, stopping early if the timer is stopped.
    pub fn fire_times(&self, count: usize) -> usize {
        (0..count).take_while(|_| self.fire()).count()
    }

    /// Period requested by the most recent `start`.
    pub fn period(&self) -> Option<Duration> {
        *self.period.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl RepeatingTimer for ManualTimer {
    fn start(&self, period: Duration, callback: TickCallback) -> Result<()> {
        let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(TrackerError::TimerAlreadyStarted);
        }
        *slot = Some(callback);
        *self.period.lock().unwrap_or_else(PoisonError::into_inner) = Some(period);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
