//! The single-queue executor.
//!
//! A [`QueuedExecutor`] owns one FIFO task queue drained by a dedicated
//! worker thread. Tasks run in submission order; the worker honors a
//! suspended flag between tasks, re-reads each task's priority at claim
//! time, dispatches async tasks onto short-lived dedicated context threads,
//! and coordinates with submitters and waiters through four named monitors:
//!
//! | Monitor | Parked party | Signaled when |
//! |---------|--------------|---------------|
//! | `resume_caller` | the worker, while suspended | `resume` is called |
//! | `executable_collection_filler` | the worker, while idle | a submitter appends |
//! | `executing_finished_waiter` | `wait_for_all` callers | the queue drains |
//! | `suspension_caller` | `suspend(immediate)` callers | a task completes |
//!
//! Shutdown is orderly: `shut_down(true)` runs everything already enqueued
//! first, `shut_down(false)` stops after the current task and clears the
//! queue. Either way the worker thread is joined before the call returns.

pub mod group;
pub(crate) mod queue;
mod worker;

use crate::metrics::ExecutorMetrics;
use crate::priority;
use crate::run_once;
use crate::sync::MonitorRegistry;
use crate::task::core::{Binding, Phase, TaskCore};
use crate::task::{ExecutionMode, ProducerTask, SubmitTarget, Task, Waitable};
use crate::tracing_compat::{debug, info, warn};
use queue::TaskQueue;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

/// Monitor parked on by the worker while the executor is suspended.
pub const RESUME_CALLER: &str = "resume_caller";
/// Monitor parked on by the idle worker until a submitter appends.
pub const EXECUTABLE_COLLECTION_FILLER: &str = "executable_collection_filler";
/// Monitor parked on by `wait_for_all` callers until the queue drains.
pub const EXECUTING_FINISHED_WAITER: &str = "executing_finished_waiter";
/// Monitor parked on by `suspend(immediate)` callers until the current task
/// completes.
pub const SUSPENSION_CALLER: &str = "suspension_caller";

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a [`QueuedExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Executor (and worker thread) name.
    pub name: String,
    /// Priority assigned to tasks created without an explicit one, and the
    /// worker's resting priority hint.
    pub default_priority: u8,
    /// Daemon hint carried for diagnostics; threads on this platform have no
    /// daemon notion, so this does not affect process exit.
    pub daemon: bool,
    /// Completions between `Executed N tasks` info records.
    pub logging_threshold: u64,
}

impl ExecutorOptions {
    /// Options with the given name and default priority.
    #[must_use]
    pub fn new(name: impl Into<String>, default_priority: u8) -> Self {
        Self {
            name: name.into(),
            default_priority,
            ..Self::default()
        }
    }

    /// Normalizes values to safe defaults.
    pub fn normalize(&mut self) {
        if self.logging_threshold == 0 {
            self.logging_threshold = 1;
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            name: "taskband-executor".to_string(),
            default_priority: priority::NORMAL,
            daemon: false,
            logging_threshold: 100,
        }
    }
}

/// Capability token authorizing shutdown of an undestroyable executor or
/// group. Returned only at construction; not cloneable.
#[derive(Debug)]
pub struct ShutdownGrant {
    owner_id: u64,
}

impl ShutdownGrant {
    pub(crate) fn new(owner_id: u64) -> Self {
        Self { owner_id }
    }

    pub(crate) fn authorizes(&self, owner_id: u64) -> bool {
        self.owner_id == owner_id
    }
}

/// Shared executor state behind the owner handle and the worker.
pub(crate) struct ExecutorInner {
    name: String,
    daemon: bool,
    logging_threshold: u64,
    owner_id: u64,
    undestroyable: bool,
    queue: TaskQueue,
    async_in_flight: Mutex<Vec<Arc<TaskCore>>>,
    current_task: Mutex<Option<Arc<TaskCore>>>,
    suspended: AtomicBool,
    terminated: AtomicBool,
    default_priority: AtomicU8,
    worker_priority: AtomicU8,
    metrics: ExecutorMetrics,
    monitors: MonitorRegistry,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
    worker_tid: OnceLock<ThreadId>,
    async_seq: AtomicU64,
}

impl ExecutorInner {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    pub(crate) fn metrics(&self) -> &ExecutorMetrics {
        &self.metrics
    }

    pub(crate) fn logging_threshold(&self) -> u64 {
        self.logging_threshold
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn default_priority(&self) -> u8 {
        self.default_priority.load(Ordering::Relaxed)
    }

    pub(crate) fn worker_priority(&self) -> u8 {
        self.worker_priority.load(Ordering::Relaxed)
    }

    pub(crate) fn set_worker_priority(&self, priority: u8) {
        self.worker_priority.store(priority, Ordering::Relaxed);
    }

    pub(crate) fn worker_tid(&self) -> ThreadId {
        *self.worker_tid.get().expect("worker not started")
    }

    pub(crate) fn next_async_seq(&self) -> u64 {
        self.async_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn set_current(&self, task: Arc<TaskCore>) {
        *self.current_task.lock().expect("current task slot poisoned") = Some(task);
    }

    pub(crate) fn current(&self) -> Option<Arc<TaskCore>> {
        self.current_task
            .lock()
            .expect("current task slot poisoned")
            .clone()
    }

    pub(crate) fn async_push(&self, task: Arc<TaskCore>) {
        self.async_in_flight
            .lock()
            .expect("async in-flight set poisoned")
            .push(task);
    }

    pub(crate) fn async_remove(&self, task_id: u64) {
        self.async_in_flight
            .lock()
            .expect("async in-flight set poisoned")
            .retain(|task| task.id() != task_id);
    }

    pub(crate) fn async_snapshot(&self) -> Vec<Arc<TaskCore>> {
        self.async_in_flight
            .lock()
            .expect("async in-flight set poisoned")
            .clone()
    }
}

impl std::fmt::Debug for ExecutorInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorInner")
            .field("name", &self.name)
            .field("queued", &self.queue.len())
            .field("suspended", &self.is_suspended())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// A single-queue task executor with a dedicated worker thread.
#[derive(Debug)]
pub struct QueuedExecutor {
    inner: Arc<ExecutorInner>,
}

impl QueuedExecutor {
    /// Creates an executor with the given name and default priority.
    #[must_use]
    pub fn create(name: impl Into<String>, default_priority: u8) -> Self {
        Self::with_options(ExecutorOptions::new(name, default_priority))
    }

    /// Creates an executor from explicit options.
    #[must_use]
    pub fn with_options(options: ExecutorOptions) -> Self {
        Self::build(options, false)
    }

    /// Creates an undestroyable executor.
    ///
    /// `shut_down` on the returned executor refuses with `false`; only
    /// [`shut_down_authorized`](Self::shut_down_authorized) with the
    /// returned grant (or dropping the owner handle) can terminate it.
    #[must_use]
    pub fn create_undestroyable(options: ExecutorOptions) -> (Self, ShutdownGrant) {
        let executor = Self::build(options, true);
        let grant = ShutdownGrant::new(executor.inner.owner_id);
        (executor, grant)
    }

    fn build(mut options: ExecutorOptions, undestroyable: bool) -> Self {
        options.normalize();
        let inner = Arc::new(ExecutorInner {
            name: options.name.clone(),
            daemon: options.daemon,
            logging_threshold: options.logging_threshold,
            owner_id: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
            undestroyable,
            queue: TaskQueue::new(),
            async_in_flight: Mutex::new(Vec::new()),
            current_task: Mutex::new(None),
            suspended: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            default_priority: AtomicU8::new(options.default_priority),
            worker_priority: AtomicU8::new(options.default_priority),
            metrics: ExecutorMetrics::new(),
            monitors: MonitorRegistry::new(),
            worker_thread: Mutex::new(None),
            worker_tid: OnceLock::new(),
            async_seq: AtomicU64::new(0),
        });
        let worker_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(options.name)
            .spawn(move || worker::run_loop(&worker_inner))
            .expect("failed to spawn executor worker");
        let _ = inner.worker_tid.set(handle.thread().id());
        *inner
            .worker_thread
            .lock()
            .expect("worker handle poisoned") = Some(handle);
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ExecutorInner> {
        &self.inner
    }

    /// Builds an action task with this executor's default priority and
    /// [`ExecutionMode::Sync`].
    #[must_use]
    pub fn create_action<F>(&self, f: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        let core = TaskCore::new(Box::new(f), ExecutionMode::Sync, self.default_priority());
        Task::new(core, SubmitTarget::Executor(Arc::clone(&self.inner)))
    }

    /// Builds a producer task holding a typed result slot.
    #[must_use]
    pub fn create_producer<T, F>(&self, f: F) -> ProducerTask<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (core, slot) = crate::task::producer_parts(f, ExecutionMode::Sync, self.default_priority());
        ProducerTask::new(core, slot, SubmitTarget::Executor(Arc::clone(&self.inner)))
    }

    /// Blocks until `task` is finished, raising tasks ahead of it to at
    /// least this executor's default priority.
    pub fn wait_for<W: Waitable>(&self, task: &W) {
        self.wait_for_with_priority(task, self.default_priority());
    }

    /// Blocks until `task` is finished.
    ///
    /// Every task ordered strictly before it in the queue has its priority
    /// raised to at least `priority` (priority inheritance for the waiter).
    pub fn wait_for_with_priority<W: Waitable>(&self, task: &W, priority: u8) {
        raise_tasks_ahead_of(&self.inner, task.id(), priority);
        task.join();
    }

    /// Blocks until the queue drains and every in-flight task finishes.
    pub fn wait_for_all(&self) {
        wait_for_all(&self.inner, self.default_priority());
    }

    /// Like [`wait_for_all`](Self::wait_for_all), raising the worker and
    /// every queued task to `priority` for the duration of the wait.
    pub fn wait_for_all_with_priority(&self, priority: u8) {
        wait_for_all(&self.inner, priority);
    }

    /// Updates the default priority, raising the worker and all queued
    /// tasks to it.
    pub fn change_default_priority(&self, priority: u8) {
        change_default_priority(&self.inner, priority);
    }

    /// Suspends the executor at this executor's default priority.
    /// See [`suspend_with_priority`](Self::suspend_with_priority).
    pub fn suspend(&self, immediate: bool) {
        self.suspend_with_priority(immediate, self.default_priority());
    }

    /// Suspends the executor.
    ///
    /// With `immediate`, sets the suspended flag and returns once the
    /// current task has finished and no async task remains in flight; no new
    /// task starts until [`resume`](Self::resume). Otherwise a sentinel
    /// action is enqueued at the tail that suspends the worker when reached,
    /// and tasks ahead of it are raised to `priority`.
    pub fn suspend_with_priority(&self, immediate: bool, priority: u8) {
        suspend(&self.inner, immediate, priority);
    }

    /// Clears the suspended flag and wakes the worker.
    pub fn resume(&self) {
        resume(&self.inner);
    }

    /// Whether the executor is currently suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.inner.is_suspended()
    }

    /// Whether the executor has been shut down.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Orderly termination.
    ///
    /// With `wait_for_tasks_termination`, every task enqueued before the
    /// call runs to completion first; otherwise the worker is suspended, the
    /// queue is cleared (unexecuted tasks finish with a terminated error),
    /// and only the current task runs to completion. Returns `false` without
    /// side effects on an undestroyable executor.
    ///
    /// A suspended executor must be resumed before an orderly
    /// (`wait_for_tasks_termination = true`) shutdown can complete.
    pub fn shut_down(&self, wait_for_tasks_termination: bool) -> bool {
        if self.inner.undestroyable {
            return false;
        }
        shut_down(&self.inner, wait_for_tasks_termination)
    }

    /// [`shut_down`](Self::shut_down) for undestroyable executors, gated on
    /// the construction-time grant.
    pub fn shut_down_authorized(
        &self,
        grant: &ShutdownGrant,
        wait_for_tasks_termination: bool,
    ) -> bool {
        if !grant.authorizes(self.inner.owner_id) {
            return false;
        }
        shut_down(&self.inner, wait_for_tasks_termination)
    }

    /// Executor name (also the worker thread name).
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Current default priority.
    #[must_use]
    pub fn default_priority(&self) -> u8 {
        self.inner.default_priority()
    }

    /// Daemon hint this executor was configured with.
    #[must_use]
    pub fn daemon(&self) -> bool {
        self.inner.daemon
    }

    /// Number of tasks currently queued (excluding the running one).
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Completion counters.
    #[must_use]
    pub fn metrics(&self) -> &ExecutorMetrics {
        &self.inner.metrics
    }

    /// The named-monitor registry owned by this executor.
    ///
    /// The four keys listed at the module level are reserved for the
    /// executor's own handshakes; other keys are free for callers to intern.
    #[must_use]
    pub fn monitors(&self) -> &MonitorRegistry {
        &self.inner.monitors
    }
}

impl Drop for QueuedExecutor {
    fn drop(&mut self) {
        if !self.inner.is_terminated() {
            // Owner is gone; stop after the current task regardless of the
            // undestroyable flag.
            let _ = shut_down(&self.inner, false);
        }
    }
}

/// Admission plus enqueue. Returns true if the task was enqueued.
pub(crate) fn submit(
    inner: &Arc<ExecutorInner>,
    core: &Arc<TaskCore>,
    result: Option<Arc<dyn Any + Send + Sync>>,
) -> bool {
    if inner.is_terminated() || core.finished() {
        return false;
    }
    let registered_key = if let Some(key) = core.run_once_key() {
        if core.predicate_reports_run() {
            return false;
        }
        loop {
            if run_once::try_register(&key, core, result.clone()) {
                break;
            }
            if let Some(entry) = run_once::lookup(&key) {
                // Collapsed: remember the canonical task so delegation
                // survives the registry entry's release.
                core.set_collapsed(entry);
                return false;
            }
            // The holder finished between the failed insert and the lookup.
        }
        // Re-check after winning the registration: the registry lock
        // ordered us after a just-finished holder, whose effects the first
        // predicate read may have missed.
        if core.predicate_reports_run() {
            run_once::remove_if_current(&key, core.id());
            return false;
        }
        Some(key)
    } else {
        None
    };
    let enqueued = {
        let mut state = core.lock();
        if state.phase == Phase::Created {
            state.phase = Phase::Queued;
            state.binding = Binding::Worker(inner.worker_tid());
            inner.queue.push_back(Arc::clone(core));
            true
        } else {
            false
        }
    };
    if !enqueued {
        if let Some(key) = registered_key {
            run_once::remove_if_current(&key, core.id());
        }
        return false;
    }
    inner.monitors.get(EXECUTABLE_COLLECTION_FILLER).notify_all();
    true
}

/// Raises every task strictly ahead of `task_id` to at least `priority`.
/// Returns false if the task is not queued here.
pub(crate) fn raise_tasks_ahead_of(
    inner: &Arc<ExecutorInner>,
    task_id: u64,
    priority: u8,
) -> bool {
    let snapshot = inner.queue.snapshot();
    if !snapshot.iter().any(|task| task.id() == task_id) {
        return false;
    }
    for task in snapshot {
        if task.id() == task_id {
            break;
        }
        task.raise_priority(priority);
    }
    true
}

pub(crate) fn wait_for_all(inner: &Arc<ExecutorInner>, priority: u8) {
    inner.set_worker_priority(priority);
    for task in inner.queue.snapshot() {
        task.set_priority(priority);
    }
    inner
        .monitors
        .get(EXECUTING_FINISHED_WAITER)
        .wait_while(|| !inner.queue.is_empty() && !inner.is_terminated());
    // The queue is empty, but the last claimed task may still be running.
    if let Some(task) = inner.current() {
        task.join_inner(false);
    }
    for task in inner.async_snapshot() {
        task.join_inner(false);
    }
    inner.set_worker_priority(inner.default_priority());
}

pub(crate) fn change_default_priority(inner: &Arc<ExecutorInner>, priority: u8) {
    inner.default_priority.store(priority, Ordering::Relaxed);
    inner.set_worker_priority(priority);
    for task in inner.queue.snapshot() {
        task.set_priority(priority);
    }
}

pub(crate) fn suspend(inner: &Arc<ExecutorInner>, immediate: bool, priority: u8) {
    inner.set_worker_priority(priority);
    if immediate {
        inner.suspended.store(true, Ordering::Release);
        debug!("executor '{}' suspending", inner.name());
        let suspension = inner.monitors.get(SUSPENSION_CALLER);
        loop {
            let pending = inner.current().filter(|task| !task.finished());
            let in_flight: Vec<_> = inner
                .async_snapshot()
                .into_iter()
                .filter(|task| !task.finished())
                .collect();
            if pending.is_none() && in_flight.is_empty() {
                break;
            }
            for task in in_flight {
                task.join_inner(false);
            }
            if let Some(task) = pending {
                suspension.wait_while(|| !task.finished());
            }
        }
    } else {
        let flag = Arc::clone(inner);
        let sentinel = TaskCore::new(
            Box::new(move || flag.suspended.store(true, Ordering::Release)),
            ExecutionMode::Sync,
            priority,
        );
        if submit(inner, &sentinel, None) {
            raise_tasks_ahead_of(inner, sentinel.id(), priority);
        }
    }
}

pub(crate) fn resume(inner: &Arc<ExecutorInner>) {
    inner
        .monitors
        .get(RESUME_CALLER)
        .signal_all(|| inner.suspended.store(false, Ordering::Release));
}

pub(crate) fn shut_down(inner: &Arc<ExecutorInner>, wait_for_tasks_termination: bool) -> bool {
    if inner.is_terminated() {
        join_worker(inner);
        return true;
    }
    if wait_for_tasks_termination {
        let terminator_inner = Arc::clone(inner);
        let terminator = TaskCore::new(
            Box::new(move || finish_and_terminate(&terminator_inner)),
            ExecutionMode::Sync,
            inner.default_priority(),
        );
        // Refusal means another shutdown won the race; joining below is
        // still correct.
        let _ = submit(inner, &terminator, None);
    } else {
        suspend(inner, true, inner.default_priority());
        finish_and_terminate(inner);
        resume(inner);
        inner.monitors.get(EXECUTABLE_COLLECTION_FILLER).notify_all();
    }
    join_worker(inner);
    inner.monitors.clear();
    true
}

fn join_worker(inner: &Arc<ExecutorInner>) {
    let handle = inner
        .worker_thread
        .lock()
        .expect("worker handle poisoned")
        .take();
    if let Some(handle) = handle {
        if handle.join().is_err() {
            warn!("executor '{}' worker terminated abnormally", inner.name());
        }
    }
}

/// Terminates the executor: joins async work, marks terminated, clears the
/// queue, and wakes every parked party.
fn finish_and_terminate(inner: &Arc<ExecutorInner>) {
    for task in inner.async_snapshot() {
        task.join_inner(false);
    }
    inner.terminated.store(true, Ordering::Release);
    let unexecuted = inner.queue.drain();
    info!("Executed tasks {}", inner.metrics.total_completed());
    info!("Unexecuted tasks {}", unexecuted.len());
    for task in &unexecuted {
        task.finish_terminated();
    }
    inner
        .async_in_flight
        .lock()
        .expect("async in-flight set poisoned")
        .clear();
    inner.monitors.get(EXECUTING_FINISHED_WAITER).notify_all();
    inner.monitors.get(EXECUTABLE_COLLECTION_FILLER).notify_all();
}
