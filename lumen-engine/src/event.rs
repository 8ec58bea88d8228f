//! Engine events and frame health counters

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

/// Events sent from the engine to the application
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SceneChanged { requested: String, effective: String },
    Predicted { scene: String, cluster: Option<usize> },
    WorkerRestarted { name: String, reason: String },
    Reinitialized,
    Error(String),
}

/// Bounded event channel. Events are dropped rather than block a worker.
pub fn event_channel() -> (EventSender, Receiver<EngineEvent>) {
    let (tx, rx) = bounded(1024);
    (EventSender { tx }, rx)
}

#[derive(Clone)]
pub struct EventSender {
    tx: Sender<EngineEvent>,
}

impl EventSender {
    pub fn send(&self, event: EngineEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::debug!("event channel full, dropping event");
        }
    }
}

/// Snapshot of render-loop health
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHealth {
    pub frames_sent: u64,
    /// Loop iterations that found no new feature vector
    pub idle_iterations: u64,
    pub fixture_errors: u64,
    pub transport_errors: u64,
    pub worker_restarts: u64,
    pub reinitializations: u64,
}

/// Health counters shared between the render loop and the controller
#[derive(Debug, Default)]
pub struct HealthCounters {
    inner: Mutex<FrameHealth>,
}

impl HealthCounters {
    pub fn snapshot(&self) -> FrameHealth {
        *self.inner.lock()
    }

    pub fn update(&self, f: impl FnOnce(&mut FrameHealth)) {
        f(&mut self.inner.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_channel_drops_when_full() {
        let (tx, rx) = event_channel();
        for _ in 0..1100 {
            tx.send(EngineEvent::Reinitialized);
        }
        assert_eq!(rx.len(), 1024);
    }

    #[test]
    fn test_health_update() {
        let health = HealthCounters::default();
        health.update(|h| {
            h.frames_sent += 2;
            h.transport_errors += 1;
        });
        let snap = health.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.transport_errors, 1);
        assert_eq!(snap.idle_iterations, 0);
    }
}
