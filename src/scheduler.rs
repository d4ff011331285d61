//! Periodic analysis scheduling
//!
//! [`PeriodicTask`] owns a ticker and a cancellation token. [`TickGuard`]
//! makes sure at most one analysis per component runs at a time, whether it
//! was triggered by the ticker or forced by an operator.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A cancellable fixed-interval background loop
///
/// `start` must be called from within a tokio runtime.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Mutex<Duration>,
    token: Mutex<Option<CancellationToken>>,
}

impl PeriodicTask {
    /// Create a stopped task
    #[must_use]
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval: Mutex::new(interval),
            token: Mutex::new(None),
        }
    }

    /// Spawn the loop; the first tick fires one interval after start.
    ///
    /// Idempotent: returns `false` without spawning if already running.
    /// A zero interval is refused and also returns `false`.
    pub fn start<F, Fut>(&self, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.token.lock();
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            debug!(task = self.name, "Periodic task already running");
            return false;
        }

        let interval = *self.interval.lock();
        if interval.is_zero() {
            warn!(task = self.name, "Periodic task has a zero interval, not starting");
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let name = self.name;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => {
                        debug!(task = name, "Periodic task stopped");
                        break;
                    }
                    _ = ticker.tick() => tick().await,
                }
            }
        });

        debug!(task = self.name, interval_ms = interval.as_millis() as u64, "Periodic task started");
        *slot = Some(token);
        true
    }

    /// Cancel future ticks; an in-flight tick is allowed to finish.
    ///
    /// Safe to call repeatedly. Returns `true` if a running loop was cancelled.
    pub fn stop(&self) -> bool {
        match self.token.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the loop is currently scheduled
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.token
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Change the interval; applies from the next `start`
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single-flight guard for analysis ticks
#[derive(Debug, Default)]
pub struct TickGuard {
    in_flight: AtomicBool,
    skipped: AtomicU64,
}

impl TickGuard {
    /// Create an idle guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the critical section, or `None` if another tick is running
    pub fn try_enter(&self) -> Option<TickPermit<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(TickPermit { guard: self })
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Ticks skipped because one was already running
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Held while a tick runs; releases the guard on drop
#[derive(Debug)]
pub struct TickPermit<'a> {
    guard: &'a TickGuard,
}

impl Drop for TickPermit<'_> {
    fn drop(&mut self) {
        self.guard.in_flight.store(false, Ordering::Release);
    }
}
