use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{Lifecycle, Runnable, RunnableError, RunnableResult};

/// Cooperative unit of work polled by a [`WorkerRuntime`].
pub trait Worker: Send {
    /// Performs a bounded slice of work and reports how many items progressed.
    fn poll(&mut self) -> usize;
    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Ordered set of workers polled round-robin on one thread.
pub struct WorkerRuntime {
    workers: Vec<Box<dyn Worker>>,
}

impl Default for WorkerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRuntime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    /// Appends a worker; polling follows registration order.
    pub fn register<W>(&mut self, worker: W)
    where
        W: Worker + 'static,
    {
        self.workers.push(Box::new(worker));
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True when no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Polls every worker once and returns the total progress.
    pub fn run_tick(&mut self) -> usize {
        let mut work = 0;
        for worker in self.workers.iter_mut() {
            work += worker.poll();
        }
        work
    }
}

/// Settings for a [`WorkerThread`].
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// OS thread name; defaults to the runnable name.
    pub thread_name: Option<String>,
    /// How long to park after a tick that made no progress.
    pub idle_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: None,
            idle_backoff: Duration::from_millis(1),
        }
    }
}

/// Runnable that polls a [`WorkerRuntime`] on its own thread until stopped.
pub struct WorkerThread {
    name: String,
    config: WorkerConfig,
    lifecycle: Arc<Lifecycle>,
    runtime: Mutex<Option<WorkerRuntime>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerThread {
    /// Creates a worker thread in the `Waiting` state; nothing runs until `start`.
    pub fn new(name: impl Into<String>, runtime: WorkerRuntime, config: WorkerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            lifecycle: Arc::new(Lifecycle::threaded()),
            runtime: Mutex::new(Some(runtime)),
            handle: Mutex::new(None),
        }
    }
}

/// Ends the lifecycle when the worker loop exits, including by panic.
struct FinishOnExit(Arc<Lifecycle>);

impl Drop for FinishOnExit {
    fn drop(&mut self) {
        self.0.stop();
        self.0.finish();
    }
}

impl Runnable for WorkerThread {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> RunnableResult<bool> {
        if !self.lifecycle.begin() {
            return Ok(false);
        }
        let Some(mut runtime) = self.runtime.lock().take() else {
            return Ok(false);
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let backoff = self.config.idle_backoff;
        let thread_name = self
            .config
            .thread_name
            .clone()
            .unwrap_or_else(|| self.name.clone());

        let spawned = thread::Builder::new().name(thread_name).spawn(move || {
            let _finish = FinishOnExit(Arc::clone(&lifecycle));
            lifecycle.bind_current_thread();
            if !lifecycle.enter_running() {
                return;
            }
            while !lifecycle.should_stop() {
                if runtime.run_tick() == 0 {
                    thread::park_timeout(backoff);
                }
            }
        });

        match spawned {
            Ok(handle) => {
                debug!(worker = %self.name, "worker thread started");
                *self.handle.lock() = Some(handle);
                Ok(true)
            }
            Err(source) => {
                self.lifecycle.stop();
                self.lifecycle.finish();
                Err(RunnableError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    fn stop(&self) {
        if self.lifecycle.stop() {
            debug!(worker = %self.name, "worker thread stop requested");
        }
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.thread().unpark();
        }
    }

    fn wait(&self) {
        self.lifecycle.wait();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        Runnable::stop(self);
        Runnable::wait(self);
    }
}
