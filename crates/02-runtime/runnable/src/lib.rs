#![deny(missing_docs)]
//! Background execution units with an observable start/stop lifecycle.
//!
//! * [`Lifecycle`] – the atomic `Waiting → Started → Running → Stopped` state
//!   machine shared by every runnable, plus a completion latch to wait on.
//! * [`Runnable`] – the object-safe trait contexts use to start, stop and
//!   enumerate their background workers.
//! * [`WorkerThread`] – a runnable that drives a [`WorkerRuntime`] of cooperative
//!   [`Worker`] engines on a dedicated OS thread.

use std::thread::ThreadId;

mod error;
mod lifecycle;
mod worker;


pub use error::{RunnableError, RunnableResult};
pub use lifecycle::{Lifecycle, RunState};
pub use worker::{Worker, WorkerConfig, WorkerRuntime, WorkerThread};

/// A unit of background execution owned by some component and hosted by a context.
///
/// Implementors only need to expose their [`Lifecycle`] and a name; the default
/// methods give a passive runnable whose work ends as soon as it is stopped.
pub trait Runnable: Send + Sync + 'static {
    /// Lifecycle backing every state query on this runnable.
    fn lifecycle(&self) -> &Lifecycle;

    /// Human-readable name used in diagnostics.
    fn name(&self) -> &str;

    /// Leaves `Waiting`. Returns `Ok(false)` if the runnable had already left it.
    fn start(&self) -> RunnableResult<bool> {
        let lifecycle = self.lifecycle();
        if !lifecycle.begin() {
            return Ok(false);
        }
        lifecycle.enter_running();
        Ok(true)
    }

    /// Requests a stop. Safe from any thread, before `start`, and more than once.
    fn stop(&self) {
        self.lifecycle().stop();
    }

    /// Blocks until the runnable's work has fully ended.
    fn wait(&self) {
        self.lifecycle().wait();
    }

    /// Current lifecycle state.
    fn state(&self) -> RunState {
        self.lifecycle().state()
    }

    /// True iff the state is [`RunState::Running`].
    fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// True iff the state is [`RunState::Stopped`].
    fn should_stop(&self) -> bool {
        self.state().should_stop()
    }

    /// True once the runnable has left [`RunState::Waiting`].
    fn was_started(&self) -> bool {
        self.state().was_started()
    }

    /// Thread currently executing this runnable's work, if bound.
    fn thread_id(&self) -> Option<ThreadId> {
        self.lifecycle().thread_id()
    }
}
