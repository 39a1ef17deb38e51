//! # Primary context: marshalling work onto the host's main thread.
//!
//! Game-world mutation (entity spawn, despawn) is only legal on one thread. The
//! engine models it as a job queue:
//!
//! ```text
//! any thread ── PrimaryHandle::run(job) ──► [unbounded queue] ──► PrimaryDriver
//!      ▲                                                            │ (host tick: drain()
//!      └──────────────── oneshot result ◄───────────────────────────┘  or spawn_thread())
//! ```
//!
//! ## Rules
//! - Jobs run with the thread-local primary flag set; [`on_primary`] reports it.
//! - `run` from inside a job executes inline (no self-deadlock).
//! - A panicking job is logged; its caller observes `PrimaryClosed`.
//! - Once the driver is dropped, every `run` returns `PrimaryClosed`.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use tokio::sync::{mpsc, oneshot};

use crate::error::EngineError;

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_PRIMARY: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is executing primary-context jobs.
pub fn on_primary() -> bool {
    ON_PRIMARY.with(Cell::get)
}

/// Fails with `WrongContext` off the primary context.
pub(crate) fn ensure(op: &'static str) -> Result<(), EngineError> {
    if on_primary() {
        Ok(())
    } else {
        Err(EngineError::WrongContext { op })
    }
}

/// Marks the current thread as primary until dropped.
struct PrimaryGuard {
    prev: bool,
}

impl PrimaryGuard {
    fn enter() -> Self {
        Self {
            prev: ON_PRIMARY.with(|f| f.replace(true)),
        }
    }
}

impl Drop for PrimaryGuard {
    fn drop(&mut self) {
        ON_PRIMARY.with(|f| f.set(self.prev));
    }
}

/// Creates a connected handle/driver pair.
pub fn channel() -> (PrimaryHandle, PrimaryDriver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PrimaryHandle { tx }, PrimaryDriver { rx })
}

/// Submits jobs to the primary context.
#[derive(Clone, Debug)]
pub struct PrimaryHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl PrimaryHandle {
    /// Runs `f` on the primary context and returns its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if on_primary() {
            return Ok(f());
        }
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = tx.send(f());
            }))
            .map_err(|_| EngineError::PrimaryClosed)?;
        rx.await.map_err(|_| EngineError::PrimaryClosed)
    }

    /// Queues `f` without waiting for it.
    pub fn submit<F>(&self, f: F) -> Result<(), EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(f))
            .map_err(|_| EngineError::PrimaryClosed)
    }
}

/// Receiving end owned by the host.
pub struct PrimaryDriver {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl PrimaryDriver {
    /// Runs every queued job on the calling thread; returns how many ran.
    ///
    /// Call from the host's main tick.
    pub fn drain(&mut self) -> usize {
        let _guard = PrimaryGuard::enter();
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            run_job(job);
            ran += 1;
        }
        ran
    }

    /// Dedicates a new OS thread to the primary context.
    ///
    /// The thread exits once every [`PrimaryHandle`] is dropped.
    pub fn spawn_thread(mut self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("dungeon-primary".into())
            .spawn(move || {
                let _guard = PrimaryGuard::enter();
                while let Some(job) = self.rx.blocking_recv() {
                    run_job(job);
                }
            })
    }
}

fn run_job(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(panic = ?panic, "primary job panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_executes_on_primary_thread() {
        let (handle, driver) = channel();
        let _thread = driver.spawn_thread().unwrap();

        assert!(!on_primary());
        let inside = handle.run(on_primary).await.unwrap();
        assert!(inside);
    }

    #[test]
    fn test_drain_runs_queued_jobs() {
        let (handle, mut driver) = channel();
        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            handle
                .submit(move || tx.send((i, on_primary())).unwrap())
                .unwrap();
        }
        assert_eq!(driver.drain(), 3);
        let got: Vec<(i32, bool)> = rx.try_iter().collect();
        assert_eq!(got, vec![(0, true), (1, true), (2, true)]);
        assert!(!on_primary(), "flag is restored after drain");
    }

    #[tokio::test]
    async fn test_closed_driver_reports_primary_closed() {
        let (handle, driver) = channel();
        drop(driver);
        let err = handle.run(|| 1).await.unwrap_err();
        assert_eq!(err.as_label(), "engine_primary_closed");
    }

    #[test]
    fn test_ensure_checks_context() {
        assert!(ensure("op").is_err());
        let (handle, mut driver) = channel();
        let (tx, rx) = std::sync::mpsc::channel();
        handle
            .submit(move || tx.send(ensure("op").is_ok()).unwrap())
            .unwrap();
        driver.drain();
        assert_eq!(rx.recv().unwrap(), true);
    }
}
