//! Render-loop watchdog
//!
//! The render loop resets the watchdog on every successful iteration. The
//! watchdog thread turns the time since the last reset into a
//! [`ReinitState`]: past half the timeout the engine is degraded, past the
//! full timeout it must be reinitialized. While the render loop waits for a
//! DMX connection the state is held at `Degraded`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinitState {
    Running,
    Degraded,
    Reinitializing,
}

/// Shared between the render loop, the watchdog thread and the controller
#[derive(Debug)]
pub struct Watchdog {
    epoch: Instant,
    /// Nanoseconds after `epoch` of the last reset
    last_reset: AtomicU64,
    timeout: Duration,
    state: Mutex<ReinitState>,
    held: AtomicBool,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_reset: AtomicU64::new(0),
            timeout,
            state: Mutex::new(ReinitState::Running),
            held: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Called by the render loop after each iteration
    pub fn reset(&self) {
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        self.last_reset.store(nanos, Ordering::Relaxed);
    }

    pub fn since_reset(&self) -> Duration {
        let last = Duration::from_nanos(self.last_reset.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }

    pub fn state(&self) -> ReinitState {
        *self.state.lock()
    }

    /// Update the state from the time since the last reset and return it.
    /// `Reinitializing` holds until [`Watchdog::complete_reinit`].
    pub fn check(&self) -> ReinitState {
        if self.is_held() {
            return self.state();
        }
        let elapsed = self.since_reset();
        let mut state = self.state.lock();
        let next = next_state(*state, elapsed, self.timeout);
        if next != *state {
            match next {
                ReinitState::Degraded => tracing::warn!(
                    since_reset_ms = elapsed.as_millis() as u64,
                    "render loop stalled, engine degraded"
                ),
                ReinitState::Reinitializing => tracing::error!(
                    since_reset_ms = elapsed.as_millis() as u64,
                    "watchdog timeout, reinitialization required"
                ),
                ReinitState::Running => tracing::info!("render loop recovered"),
            }
            *state = next;
        }
        next
    }

    /// Mark reinitialization done and restart the timeout window
    pub fn complete_reinit(&self) {
        self.held.store(false, Ordering::Release);
        self.reset();
        *self.state.lock() = ReinitState::Running;
    }

    /// Pin the state at `Degraded` until [`Watchdog::release`]. A pending
    /// reinitialization is kept.
    pub fn hold_degraded(&self) {
        if self.held.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        if *state != ReinitState::Reinitializing {
            *state = ReinitState::Degraded;
        }
        tracing::warn!("waiting for DMX interface, engine degraded");
    }

    /// End a hold and restart the timeout window
    pub fn release(&self) {
        if self.held.swap(false, Ordering::AcqRel) {
            self.reset();
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

fn next_state(current: ReinitState, elapsed: Duration, timeout: Duration) -> ReinitState {
    if current == ReinitState::Reinitializing {
        return current;
    }
    if elapsed >= timeout {
        ReinitState::Reinitializing
    } else if elapsed >= timeout / 2 {
        ReinitState::Degraded
    } else {
        ReinitState::Running
    }
}

/// Watchdog thread body: poll until `running` clears
pub fn run_watchdog(watchdog: Arc<Watchdog>, running: Arc<AtomicBool>) {
    let poll = (watchdog.timeout() / 20).clamp(Duration::from_millis(5), Duration::from_millis(100));
    watchdog.reset();
    while running.load(Ordering::Relaxed) {
        watchdog.check();
        thread::sleep(poll);
    }
}
