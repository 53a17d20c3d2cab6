//! Atomic lifecycle state machine shared by all runnables.
//!
//! Transitions are single compare-and-swap operations so every observer agrees
//! on the current state. `Stopped` is absorbing: it is reachable from any state
//! and nothing leaves it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Observable lifecycle state of a runnable.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Constructed, never started.
    Waiting = 0,
    /// Start requested; work has not begun yet.
    Started = 1,
    /// Work is executing.
    Running = 2,
    /// Stop requested or work ended. Terminal.
    Stopped = 3,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunState::Waiting,
            1 => RunState::Started,
            2 => RunState::Running,
            _ => RunState::Stopped,
        }
    }

    /// True iff `Running`.
    pub fn is_running(self) -> bool {
        self == RunState::Running
    }

    /// True iff `Stopped`.
    pub fn should_stop(self) -> bool {
        self == RunState::Stopped
    }

    /// True for every state other than `Waiting`.
    pub fn was_started(self) -> bool {
        self != RunState::Waiting
    }

    /// Upper-case label used by diagnostic printers.
    pub fn label(self) -> &'static str {
        match self {
            RunState::Waiting => "WAITING",
            RunState::Started => "STARTED",
            RunState::Running => "RUNNING",
            RunState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state plus a completion latch.
///
/// A passive lifecycle completes the moment it is stopped. A threaded one
/// completes only when its thread calls [`Lifecycle::finish`], unless it is
/// stopped before ever starting.
pub struct Lifecycle {
    state: AtomicU8,
    threaded: bool,
    owner: Mutex<Option<ThreadId>>,
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl Lifecycle {
    /// Lifecycle for a runnable without its own thread.
    pub fn new() -> Self {
        Self::with_threading(false)
    }

    /// Lifecycle for a runnable whose work runs on a dedicated thread.
    pub fn threaded() -> Self {
        Self::with_threading(true)
    }

    fn with_threading(threaded: bool) -> Self {
        Self {
            state: AtomicU8::new(RunState::Waiting as u8),
            threaded,
            owner: Mutex::new(None),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// See [`RunState::is_running`].
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// See [`RunState::should_stop`].
    pub fn should_stop(&self) -> bool {
        self.state().should_stop()
    }

    /// See [`RunState::was_started`].
    pub fn was_started(&self) -> bool {
        self.state().was_started()
    }

    /// `Waiting → Started`. Returns false from any other state.
    pub fn begin(&self) -> bool {
        self.transition(RunState::Waiting, RunState::Started)
    }

    /// `Started → Running`. Returns false from any other state.
    pub fn enter_running(&self) -> bool {
        self.transition(RunState::Started, RunState::Running)
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to `Stopped`. Returns true only for the call that performed the transition.
    pub fn stop(&self) -> bool {
        let prev = RunState::from_u8(self.state.swap(RunState::Stopped as u8, Ordering::AcqRel));
        if prev == RunState::Stopped {
            return false;
        }
        if !self.threaded || prev == RunState::Waiting {
            self.finish();
        }
        true
    }

    /// Records the calling thread as the one executing this runnable.
    pub fn bind_current_thread(&self) {
        *self.owner.lock() = Some(thread::current().id());
    }

    /// Thread bound through [`Lifecycle::bind_current_thread`], if any.
    pub fn thread_id(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    /// Marks the work as fully ended and releases waiters.
    pub fn finish(&self) {
        let mut finished = self.finished.lock();
        *finished = true;
        self.finished_cv.notify_all();
    }

    /// Blocks until the work has ended.
    pub fn wait(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.finished_cv.wait(&mut finished);
        }
    }

    /// Like [`Lifecycle::wait`] but gives up after `timeout`. Returns true if finished.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.finished.lock();
        while !*finished {
            if self
                .finished_cv
                .wait_until(&mut finished, deadline)
                .timed_out()
            {
                return *finished;
            }
        }
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .field("threaded", &self.threaded)
            .field("thread", &self.thread_id())
            .finish()
    }
}
