//! Task handles: run-and-forget actions and value-producing tasks.
//!
//! A task is created by a [`QueuedExecutor`](crate::QueuedExecutor) or an
//! [`ExecutorGroup`](crate::ExecutorGroup), optionally configured (priority,
//! execution mode, run-once identity), then submitted. Handles are cheap to
//! clone; every clone observes the same underlying task.
//!
//! # Lifecycle
//!
//! `CREATED → QUEUED → RUNNING → FINISHED` (terminal). Priority and mode are
//! mutable only until the worker claims the task; once finished, the result
//! and error are stable and readable by any waiter.
//!
//! # Run-once collapsing
//!
//! A task carrying a run-once identity may collapse into the canonical task
//! already registered for that identity. Joining, completion checks, error
//! reads, and priority/mode changes on a collapsed handle transparently
//! delegate to the canonical task; producer handles recover the canonical
//! result through the shared result slot.

pub(crate) mod core;

use crate::error::{Error, ErrorKind, Result};
use crate::run_once;
use crate::run_once::Registered;
use crate::task::core::TaskCore;
use crate::tracing_compat::debug;
use std::any::Any;
use std::sync::{Arc, Mutex};

/// How a task is dispatched when the worker drains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run on the queue's worker thread, serializing with the queue.
    Sync,
    /// Run on a dedicated short-lived context thread; the worker only
    /// accounts the dispatch.
    Async,
}

/// Where a submitted task is routed.
#[derive(Clone)]
pub(crate) enum SubmitTarget {
    Executor(Arc<crate::executor::ExecutorInner>),
    Group(Arc<crate::executor::group::GroupInner>),
}

/// The common waiting surface implemented by [`Task`] and
/// [`ProducerTask`], accepted by executor-level wait operations.
pub trait Waitable {
    /// Opaque queue identity of the underlying task. For a collapsed
    /// run-once handle this is the canonical task's identity, so queue
    /// operations (such as priority inheritance in `wait_for`) address the
    /// task that is actually enqueued.
    fn id(&self) -> u64;
    /// Current priority.
    fn priority(&self) -> u8;
    /// Requests a priority change; a no-op once the task is running.
    fn change_priority(&self, priority: u8);
    /// Blocks until the task is finished, with run-once delegation.
    fn join(&self);
    /// Whether the task has finished.
    fn finished(&self) -> bool;
}

/// A run-and-forget action task.
#[derive(Clone)]
pub struct Task {
    core: Arc<TaskCore>,
    target: SubmitTarget,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id())
            .field("finished", &self.finished())
            .finish()
    }
}

impl Task {
    pub(crate) fn new(core: Arc<TaskCore>, target: SubmitTarget) -> Self {
        Self { core, target }
    }

    /// Sets the priority before submission (builder form).
    #[must_use]
    pub fn with_priority(self, priority: u8) -> Self {
        change_priority_of(&self.core, &self.target, priority);
        self
    }

    /// Sets the execution mode before submission (builder form).
    #[must_use]
    pub fn with_mode(self, mode: ExecutionMode) -> Self {
        set_mode_of(&self.core, mode);
        self
    }

    /// Attaches a run-once identity and its has-been-executed predicate.
    ///
    /// Must precede [`submit`](Self::submit); at submission the task is
    /// admitted only if the predicate returns false and no canonical task is
    /// already registered for `key`.
    #[must_use]
    pub fn run_only_once<P>(self, key: impl Into<String>, has_run: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.core.set_run_once(key.into(), Arc::new(has_run));
        self
    }

    /// Submits the task for execution.
    ///
    /// A non-admissible task (already finished, executor terminated, or
    /// collapsed by run-once) is silently not enqueued; the returned handle
    /// still joins correctly on the canonical representative.
    #[must_use = "join on the returned handle to observe completion"]
    pub fn submit(self) -> Self {
        submit_of(&self.core, &self.target, None);
        self
    }

    /// Blocks until the task is finished.
    ///
    /// A worker thread joining its own in-flight task returns immediately;
    /// use [`join_ignoring_self`](Self::join_ignoring_self) to relax that
    /// guard on re-entrant administrative paths.
    pub fn join(&self) {
        self.join_with(false);
    }

    /// Blocks until the task is finished, without the self-join guard.
    pub fn join_ignoring_self(&self) {
        self.join_with(true);
    }

    fn join_with(&self, ignore_self: bool) {
        if let Some(entry) = delegate_of(&self.core) {
            entry.core.join_inner(ignore_self);
            return;
        }
        self.core.join_inner(ignore_self);
    }

    /// Whether the task (or its canonical representative) has finished.
    #[must_use]
    pub fn finished(&self) -> bool {
        finished_of(&self.core)
    }

    /// The captured execution error, if the task ended with one.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        error_of(&self.core)
    }

    /// Whether the task finished with a captured error.
    #[must_use]
    pub fn ended_with_errors(&self) -> bool {
        self.error().is_some()
    }

    /// Current priority.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.core.priority()
    }

    /// Current execution mode.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.core.mode()
    }

    /// Requests a priority change.
    ///
    /// Allowed only while the task is still queued; for group-routed tasks
    /// this re-routes the task across bands under the task monitor. A task
    /// already claimed by a worker keeps its position and the change is a
    /// scheduling hint only.
    pub fn change_priority(&self, priority: u8) {
        change_priority_of(&self.core, &self.target, priority);
    }

    /// Requests an execution-mode change; a no-op once the task is running.
    pub fn set_mode(&self, mode: ExecutionMode) {
        set_mode_of(&self.core, mode);
    }

    pub(crate) fn core_handle(&self) -> &Arc<TaskCore> {
        &self.core
    }
}

impl Waitable for Task {
    fn id(&self) -> u64 {
        delegated_id(&self.core)
    }

    fn priority(&self) -> u8 {
        Self::priority(self)
    }

    fn change_priority(&self, priority: u8) {
        Self::change_priority(self, priority);
    }

    fn join(&self) {
        Self::join(self);
    }

    fn finished(&self) -> bool {
        Self::finished(self)
    }
}

/// A task producing a value of type `T`.
///
/// The result slot is shared by every clone of the handle; `join` clones the
/// stored value out so that all waiters observe it.
pub struct ProducerTask<T> {
    core: Arc<TaskCore>,
    slot: Arc<Mutex<Option<T>>>,
    target: SubmitTarget,
}

impl<T> Clone for ProducerTask<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            slot: Arc::clone(&self.slot),
            target: self.target.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ProducerTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerTask")
            .field("id", &self.core.id())
            .field("finished", &finished_of(&self.core))
            .finish()
    }
}

impl<T> ProducerTask<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        core: Arc<TaskCore>,
        slot: Arc<Mutex<Option<T>>>,
        target: SubmitTarget,
    ) -> Self {
        Self { core, slot, target }
    }

    /// Sets the priority before submission (builder form).
    #[must_use]
    pub fn with_priority(self, priority: u8) -> Self {
        change_priority_of(&self.core, &self.target, priority);
        self
    }

    /// Sets the execution mode before submission (builder form).
    #[must_use]
    pub fn with_mode(self, mode: ExecutionMode) -> Self {
        set_mode_of(&self.core, mode);
        self
    }

    /// Attaches a run-once identity and its has-been-executed predicate.
    #[must_use]
    pub fn run_only_once<P>(self, key: impl Into<String>, has_run: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.core.set_run_once(key.into(), Arc::new(has_run));
        self
    }

    /// Submits the task for execution. See [`Task::submit`].
    #[must_use = "join on the returned handle to obtain the result"]
    pub fn submit(self) -> Self {
        let slot_concrete: Arc<Mutex<Option<T>>> = Arc::clone(&self.slot);
        let slot: Arc<dyn Any + Send + Sync> = slot_concrete;
        submit_of(&self.core, &self.target, Some(slot));
        self
    }

    /// Blocks until finished and returns the produced value.
    ///
    /// Surfaces a captured execution error as `Err`; a collapsed run-once
    /// handle recovers the canonical task's result.
    pub fn join(&self) -> Result<T>
    where
        T: Clone,
    {
        self.join_value(false)
    }

    /// Like [`join`](Self::join), without the self-join guard.
    pub fn join_ignoring_self(&self) -> Result<T>
    where
        T: Clone,
    {
        self.join_value(true)
    }

    fn join_value(&self, ignore_self: bool) -> Result<T>
    where
        T: Clone,
    {
        if let Some(entry) = delegate_of(&self.core) {
            entry.core.join_inner(ignore_self);
            if let Some(error) = entry.core.error() {
                return Err(error);
            }
            let slot = entry.result.ok_or_else(|| {
                Error::new(ErrorKind::ResultUnavailable)
                    .with_context("identity collapsed into a non-producer task")
            })?;
            let slot = slot.downcast::<Mutex<Option<T>>>().map_err(|_| {
                Error::new(ErrorKind::ResultUnavailable)
                    .with_context("identity collapsed into a producer of a different type")
            })?;
            let value = slot.lock().expect("result slot poisoned").clone();
            return value.ok_or_else(|| Error::new(ErrorKind::ResultUnavailable));
        }
        self.core.join_inner(ignore_self);
        if let Some(error) = self.core.error() {
            return Err(error);
        }
        self.slot
            .lock()
            .expect("result slot poisoned")
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::ResultUnavailable))
    }

    /// Waits for completion without reading the result.
    fn wait_completion(&self) {
        if let Some(entry) = delegate_of(&self.core) {
            entry.core.join_inner(false);
            return;
        }
        self.core.join_inner(false);
    }

    /// Returns the produced value without blocking, if already available.
    ///
    /// A collapsed run-once handle reads the canonical task's result slot;
    /// its own slot is never written.
    #[must_use]
    pub fn result(&self) -> Option<T>
    where
        T: Clone,
    {
        if let Some(entry) = delegate_of(&self.core) {
            return entry
                .result
                .and_then(|slot| slot.downcast::<Mutex<Option<T>>>().ok())
                .and_then(|slot| slot.lock().expect("result slot poisoned").clone());
        }
        self.slot.lock().expect("result slot poisoned").clone()
    }

    /// Whether the task (or its canonical representative) has finished.
    #[must_use]
    pub fn finished(&self) -> bool {
        finished_of(&self.core)
    }

    /// The captured execution error, if the task ended with one.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        error_of(&self.core)
    }

    /// Whether the task finished with a captured error.
    #[must_use]
    pub fn ended_with_errors(&self) -> bool {
        self.error().is_some()
    }

    /// Current priority.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.core.priority()
    }

    /// Current execution mode.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.core.mode()
    }

    /// Requests a priority change. See [`Task::change_priority`].
    pub fn change_priority(&self, priority: u8) {
        change_priority_of(&self.core, &self.target, priority);
    }

    /// Requests an execution-mode change; a no-op once running.
    pub fn set_mode(&self, mode: ExecutionMode) {
        set_mode_of(&self.core, mode);
    }
}

impl<T> Waitable for ProducerTask<T>
where
    T: Send + 'static,
{
    fn id(&self) -> u64 {
        delegated_id(&self.core)
    }

    fn priority(&self) -> u8 {
        Self::priority(self)
    }

    fn change_priority(&self, priority: u8) {
        Self::change_priority(self, priority);
    }

    fn join(&self) {
        self.wait_completion();
    }

    fn finished(&self) -> bool {
        Self::finished(self)
    }
}

/// The canonical task this handle delegates to, when its submission
/// collapsed into a different canonical task. The collapse recorded at
/// admission wins; a live registry entry covers handles that were never
/// submitted themselves.
fn delegate_of(core: &Arc<TaskCore>) -> Option<Registered> {
    if let Some(entry) = core.collapsed_into() {
        return Some(entry);
    }
    let key = core.run_once_key()?;
    let entry = run_once::lookup(&key)?;
    if Arc::ptr_eq(&entry.core, core) {
        None
    } else {
        Some(entry)
    }
}

/// Queue identity after delegation: the canonical task's id for a collapsed
/// handle, the handle's own otherwise.
fn delegated_id(core: &Arc<TaskCore>) -> u64 {
    delegate_of(core).map_or_else(|| core.id(), |entry| entry.core.id())
}

fn finished_of(core: &Arc<TaskCore>) -> bool {
    if let Some(entry) = delegate_of(core) {
        return entry.core.finished();
    }
    if core.finished() {
        return true;
    }
    let Some(key) = core.run_once_key() else {
        return false;
    };
    if run_once::lookup(&key).is_some() {
        // This task is the pending canonical.
        return false;
    }
    // Run-once task that was never admitted: the predicate is the verdict.
    core.predicate_reports_run()
}

fn error_of(core: &Arc<TaskCore>) -> Option<Error> {
    delegate_of(core).map_or_else(|| core.error(), |entry| entry.core.error())
}

fn change_priority_of(core: &Arc<TaskCore>, target: &SubmitTarget, priority: u8) {
    let core = delegate_of(core).map_or_else(|| Arc::clone(core), |entry| entry.core);
    match target {
        SubmitTarget::Executor(_) => core.set_priority(priority),
        SubmitTarget::Group(group) => {
            crate::executor::group::change_priority(group, &core, priority);
        }
    }
}

// Mode changes need no routing: dispatch reads the mode at claim time, so
// rebinding the executor reference is implicit for both targets.
fn set_mode_of(core: &Arc<TaskCore>, mode: ExecutionMode) {
    let core = delegate_of(core).map_or_else(|| Arc::clone(core), |entry| entry.core);
    core.set_mode(mode);
}

/// Builds the type-erased core and the typed result slot of a producer.
pub(crate) fn producer_parts<T, F>(
    f: F,
    mode: ExecutionMode,
    priority: u8,
) -> (Arc<TaskCore>, Arc<Mutex<Option<T>>>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let writer = Arc::clone(&slot);
    let core = TaskCore::new(
        Box::new(move || {
            let value = f();
            *writer.lock().expect("result slot poisoned") = Some(value);
        }),
        mode,
        priority,
    );
    (core, slot)
}

fn submit_of(
    core: &Arc<TaskCore>,
    target: &SubmitTarget,
    result: Option<Arc<dyn Any + Send + Sync>>,
) {
    let admitted = match target {
        SubmitTarget::Executor(inner) => crate::executor::submit(inner, core, result),
        SubmitTarget::Group(group) => {
            crate::executor::group::submit_to_band(group, core, result)
        }
    };
    if !admitted {
        debug!("task {} submission refused at admission", core.id());
    }
}
