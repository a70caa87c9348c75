//! Internal task state shared by handles, queues, and workers.

use crate::error::{Error, ErrorKind};
use crate::task::ExecutionMode;
use crate::tracing_compat::warn;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Task lifecycle. Transitions are monotone; `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Created,
    Queued,
    Running,
    Finished,
}

impl Phase {
    /// Priority and mode are mutable only before the task is claimed.
    pub(crate) fn is_mutable(self) -> bool {
        matches!(self, Self::Created | Self::Queued)
    }
}

/// Which thread of control will run (or ran) the task.
///
/// `Dedicated(None)` means an async context has been dispatched but has not
/// yet published its thread id; the join guard must treat it as "someone
/// else" and wait.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Binding {
    Unbound,
    Worker(ThreadId),
    Dedicated(Option<ThreadId>),
}

/// Run-once configuration attached before submission.
pub(crate) struct RunOnceSpec {
    pub(crate) key: String,
    pub(crate) has_run: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl std::fmt::Debug for RunOnceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOnceSpec").field("key", &self.key).finish()
    }
}

/// Everything guarded by the task monitor.
pub(crate) struct TaskState {
    pub(crate) executable: Option<Box<dyn FnOnce() + Send>>,
    pub(crate) mode: ExecutionMode,
    pub(crate) priority: u8,
    pub(crate) phase: Phase,
    pub(crate) error: Option<Error>,
    pub(crate) binding: Binding,
    pub(crate) run_once: Option<RunOnceSpec>,
    /// The canonical task this submission collapsed into, recorded at
    /// admission so delegation stays stable after the registry entry is
    /// released.
    pub(crate) collapsed_into: Option<crate::run_once::Registered>,
}

/// The central task entity: a monitor (mutex + condvar) over [`TaskState`],
/// plus a process-unique identity used for queue removal.
pub(crate) struct TaskCore {
    id: u64,
    state: Mutex<TaskState>,
    finished_cond: Condvar,
}

impl std::fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("finished", &self.finished())
            .finish()
    }
}

impl TaskCore {
    pub(crate) fn new(
        executable: Box<dyn FnOnce() + Send>,
        mode: ExecutionMode,
        priority: u8,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(TaskState {
                executable: Some(executable),
                mode,
                priority,
                phase: Phase::Created,
                error: None,
                binding: Binding::Unbound,
                run_once: None,
                collapsed_into: None,
            }),
            finished_cond: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Locks the task monitor.
    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().expect("task monitor poisoned")
    }

    pub(crate) fn finished(&self) -> bool {
        self.lock().phase == Phase::Finished
    }

    pub(crate) fn priority(&self) -> u8 {
        self.lock().priority
    }

    pub(crate) fn mode(&self) -> ExecutionMode {
        self.lock().mode
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.lock().error.clone()
    }

    pub(crate) fn run_once_key(&self) -> Option<String> {
        self.lock().run_once.as_ref().map(|spec| spec.key.clone())
    }

    /// Evaluates the has-been-executed predicate, if one is attached.
    ///
    /// The predicate is user code; it runs outside the task monitor.
    pub(crate) fn predicate_reports_run(&self) -> bool {
        let predicate = self
            .lock()
            .run_once
            .as_ref()
            .map(|spec| Arc::clone(&spec.has_run));
        predicate.is_some_and(|has_run| has_run())
    }

    /// Attaches run-once identity. Only meaningful before submission.
    pub(crate) fn set_run_once(&self, key: String, has_run: Arc<dyn Fn() -> bool + Send + Sync>) {
        let mut state = self.lock();
        if state.phase == Phase::Created {
            state.run_once = Some(RunOnceSpec { key, has_run });
        }
    }

    /// Records the canonical task this submission collapsed into.
    pub(crate) fn set_collapsed(&self, entry: crate::run_once::Registered) {
        self.lock().collapsed_into = Some(entry);
    }

    /// The canonical task recorded at a collapsed admission, if any.
    pub(crate) fn collapsed_into(&self) -> Option<crate::run_once::Registered> {
        self.lock().collapsed_into.clone()
    }

    /// Sets the priority, if the task is still mutable (not claimed).
    pub(crate) fn set_priority(&self, priority: u8) {
        let mut state = self.lock();
        if state.phase.is_mutable() {
            state.priority = priority;
        }
    }

    /// Raises the priority to at least `priority`, if still mutable.
    pub(crate) fn raise_priority(&self, priority: u8) {
        let mut state = self.lock();
        if state.phase.is_mutable() && state.priority < priority {
            state.priority = priority;
        }
    }

    /// Sets the execution mode; a no-op once the task is running.
    pub(crate) fn set_mode(&self, mode: ExecutionMode) {
        let mut state = self.lock();
        if state.phase.is_mutable() {
            state.mode = mode;
        }
    }

    /// Runs the task body on the calling thread.
    ///
    /// Panics are captured as the task error; the caller thread survives.
    /// On completion the executable and binding are cleared, the run-once
    /// registry entry (if any) is released, and waiters are woken.
    pub(crate) fn execute(&self) {
        let work = {
            let mut state = self.lock();
            let Some(work) = state.executable.take() else {
                return;
            };
            if let Binding::Dedicated(published @ None) = &mut state.binding {
                *published = Some(thread::current().id());
            }
            state.phase = Phase::Running;
            work
        };
        let outcome = catch_unwind(AssertUnwindSafe(work));
        let run_once_key = {
            let mut state = self.lock();
            if let Err(payload) = outcome {
                let error = Error::from_panic(payload.as_ref());
                warn!("task {} ended with error: {}", self.id, error);
                state.error = Some(error);
            }
            state.phase = Phase::Finished;
            state.binding = Binding::Unbound;
            state.run_once.as_ref().map(|spec| spec.key.clone())
        };
        if let Some(key) = run_once_key {
            crate::run_once::remove_if_current(&key, self.id);
        }
        self.finished_cond.notify_all();
    }

    /// Finishes a queued-but-never-run task at shutdown.
    ///
    /// The task is marked finished with [`ErrorKind::Terminated`] and its
    /// waiters are woken. A task already claimed by a worker is left alone.
    pub(crate) fn finish_terminated(&self) {
        let run_once_key = {
            let mut state = self.lock();
            if state.executable.is_none() {
                return;
            }
            state.executable = None;
            state.error = Some(Error::new(ErrorKind::Terminated));
            state.phase = Phase::Finished;
            state.binding = Binding::Unbound;
            state.run_once.as_ref().map(|spec| spec.key.clone())
        };
        if let Some(key) = run_once_key {
            crate::run_once::remove_if_current(&key, self.id);
        }
        self.finished_cond.notify_all();
    }

    /// Blocks until the task is finished.
    ///
    /// Unless `ignore_self` is set, the guard refuses to wait when the
    /// caller is the thread bound to run the task (a worker joining its own
    /// in-flight task would deadlock) or when the task is unbound (it was
    /// never submitted, so nothing will ever finish it).
    pub(crate) fn join_inner(&self, ignore_self: bool) {
        let caller = thread::current().id();
        let mut state = self.lock();
        loop {
            if state.phase == Phase::Finished {
                return;
            }
            if !ignore_self {
                match state.binding {
                    Binding::Unbound => return,
                    Binding::Worker(bound) | Binding::Dedicated(Some(bound))
                        if bound == caller =>
                    {
                        return;
                    }
                    _ => {}
                }
            }
            state = self
                .finished_cond
                .wait(state)
                .expect("task monitor poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_core() -> Arc<TaskCore> {
        TaskCore::new(Box::new(|| {}), ExecutionMode::Sync, 5)
    }

    #[test]
    fn ids_are_unique() {
        let a = noop_core();
        let b = noop_core();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn execute_clears_executable_and_finishes() {
        let core = noop_core();
        assert!(!core.finished());
        core.execute();
        assert!(core.finished());
        assert!(core.error().is_none());
        // Re-execution is a no-op
        core.execute();
        assert!(core.finished());
    }

    #[test]
    fn panic_is_captured_as_error() {
        let core = TaskCore::new(Box::new(|| panic!("exploded")), ExecutionMode::Sync, 5);
        core.execute();
        assert!(core.finished());
        let error = core.error().expect("error captured");
        assert!(error.is_panic());
        assert_eq!(error.context(), Some("exploded"));
    }

    #[test]
    fn priority_frozen_after_claim() {
        let core = noop_core();
        core.set_priority(7);
        assert_eq!(core.priority(), 7);
        core.raise_priority(3);
        assert_eq!(core.priority(), 7);
        core.raise_priority(9);
        assert_eq!(core.priority(), 9);
        core.execute();
        core.set_priority(2);
        assert_eq!(core.priority(), 9);
    }

    #[test]
    fn mode_frozen_after_finish() {
        let core = noop_core();
        core.set_mode(ExecutionMode::Async);
        assert_eq!(core.mode(), ExecutionMode::Async);
        core.execute();
        core.set_mode(ExecutionMode::Sync);
        assert_eq!(core.mode(), ExecutionMode::Async);
    }

    #[test]
    fn join_on_unbound_task_returns_immediately() {
        let core = noop_core();
        core.join_inner(false);
        assert!(!core.finished());
    }

    #[test]
    fn finish_terminated_wakes_with_error() {
        let core = noop_core();
        core.finish_terminated();
        assert!(core.finished());
        assert!(core.error().expect("terminated error").is_terminated());
        // Already-finished tasks are left alone
        core.finish_terminated();
    }
}
