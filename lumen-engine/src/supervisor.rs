//! Supervised worker threads
//!
//! Each worker is a named closure run on its own thread while the shared
//! running flag is set. A worker that returns or panics while the flag is
//! still set is logged and restarted. Stopping clears the flag and joins
//! every thread with a bounded wait.

use crate::error::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type WorkerFn = Arc<dyn Fn(Arc<AtomicBool>) -> Result<(), EngineError> + Send + Sync>;

struct Worker {
    name: String,
    body: WorkerFn,
    handle: Option<JoinHandle<Result<(), EngineError>>>,
    restarts: u64,
}

/// A worker that died and was restarted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restart {
    pub name: String,
    pub reason: String,
}

pub struct Supervisor {
    running: Arc<AtomicBool>,
    workers: Vec<Worker>,
    join_timeout: Duration,
}

impl Supervisor {
    pub fn new(join_timeout: Duration) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            join_timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Register a worker. It starts immediately if the supervisor is running.
    pub fn add<F>(&mut self, name: &str, body: F) -> Result<(), EngineError>
    where
        F: Fn(Arc<AtomicBool>) -> Result<(), EngineError> + Send + Sync + 'static,
    {
        let mut worker = Worker {
            name: name.to_string(),
            body: Arc::new(body),
            handle: None,
            restarts: 0,
        };
        if self.is_running() {
            worker.handle = Some(spawn(&worker, self.running.clone())?);
        }
        self.workers.push(worker);
        Ok(())
    }

    /// Start every registered worker under a fresh running flag
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        self.running = Arc::new(AtomicBool::new(true));
        for worker in &mut self.workers {
            worker.handle = Some(spawn(worker, self.running.clone())?);
        }
        tracing::info!(workers = self.workers.len(), "workers started");
        Ok(())
    }

    /// Restart workers whose thread has ended while running
    pub fn check(&mut self) -> Vec<Restart> {
        let mut restarted = Vec::new();
        if !self.is_running() {
            return restarted;
        }
        for worker in &mut self.workers {
            let finished = worker.handle.as_ref().map_or(true, |h| h.is_finished());
            if !finished {
                continue;
            }
            let reason = match worker.handle.take().map(|h| h.join()) {
                Some(Ok(Ok(()))) => "exited".to_string(),
                Some(Ok(Err(e))) => e.to_string(),
                Some(Err(panic)) => panic_message(panic.as_ref()),
                None => "not running".to_string(),
            };
            let died = EngineError::WorkerDied {
                name: worker.name.clone(),
                reason: reason.clone(),
            };
            tracing::error!(restarts = worker.restarts + 1, "{}; restarting", died);

            match spawn(worker, self.running.clone()) {
                Ok(handle) => {
                    worker.handle = Some(handle);
                    worker.restarts += 1;
                }
                Err(e) => tracing::error!("{}", e),
            }
            restarted.push(Restart {
                name: worker.name.clone(),
                reason,
            });
        }
        restarted
    }

    /// Clear the running flag and join every worker, waiting at most the
    /// join timeout for each. Overruns are logged and the thread detached.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            let deadline = Instant::now() + self.join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if !handle.is_finished() {
                tracing::warn!(worker = %worker.name, timeout_ms = self.join_timeout.as_millis() as u64, "worker did not stop in time, detaching");
                continue;
            }
            match handle.join() {
                Ok(Ok(())) => tracing::debug!(worker = %worker.name, "worker stopped"),
                Ok(Err(e)) => tracing::warn!(worker = %worker.name, "worker stopped with error: {}", e),
                Err(panic) => tracing::error!(worker = %worker.name, "worker panicked: {}", panic_message(panic.as_ref())),
            }
        }
    }

    pub fn restarts(&self, name: &str) -> u64 {
        self.workers.iter().find(|w| w.name == name).map_or(0, |w| w.restarts)
    }

    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.name.as_str())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(worker: &Worker, running: Arc<AtomicBool>) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let body = worker.body.clone();
    thread::Builder::new()
        .name(format!("lumen-{}", worker.name))
        .spawn(move || body(running))
        .map_err(|source| EngineError::Spawn {
            name: worker.name.clone(),
            source,
        })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
