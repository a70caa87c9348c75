//! Three-band executor group.
//!
//! An [`ExecutorGroup`] binds one [`QueuedExecutor`](super::QueuedExecutor)
//! to each priority band (LOW, NORMAL, HIGH). Submissions route to the band
//! matching their clamped priority; each band drains independently on its
//! own worker, so there is no cross-band ordering and a higher band never
//! waits behind a lower one.
//!
//! Band defaults follow the band scale: default priorities 1/5/10 and
//! logging thresholds 1000/100/10 for LOW/NORMAL/HIGH.

use super::{ExecutorInner, ExecutorOptions, QueuedExecutor, ShutdownGrant};
use crate::priority::{self, Band};
use crate::task::core::{Binding, Phase, TaskCore};
use crate::task::{producer_parts, ExecutionMode, ProducerTask, SubmitTarget, Task, Waitable};
use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// Shared group state behind the owner handle and group-routed tasks.
pub(crate) struct GroupInner {
    name: String,
    undestroyable: bool,
    owner_id: u64,
    bands: Mutex<Option<BandSet>>,
}

struct BandSet {
    low: QueuedExecutor,
    normal: QueuedExecutor,
    high: QueuedExecutor,
}

impl BandSet {
    fn executor(&self, band: Band) -> &QueuedExecutor {
        match band {
            Band::Low => &self.low,
            Band::Normal => &self.normal,
            Band::High => &self.high,
        }
    }
}

impl GroupInner {
    fn band_inner(&self, band: Band) -> Option<Arc<ExecutorInner>> {
        self.bands
            .lock()
            .expect("band map poisoned")
            .as_ref()
            .map(|set| Arc::clone(set.executor(band).inner()))
    }
}

impl std::fmt::Debug for GroupInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupInner")
            .field("name", &self.name)
            .field(
                "terminated",
                &self.bands.lock().expect("band map poisoned").is_none(),
            )
            .finish()
    }
}

/// Three single-queue executors bound to the LOW/NORMAL/HIGH bands.
#[derive(Debug)]
pub struct ExecutorGroup {
    inner: Arc<GroupInner>,
}

impl ExecutorGroup {
    /// Creates a group with one worker per band.
    #[must_use]
    pub fn create(name: impl Into<String>, daemon: bool) -> Self {
        Self::build(&name.into(), daemon, false)
    }

    /// Creates an undestroyable group; see
    /// [`QueuedExecutor::create_undestroyable`].
    #[must_use]
    pub fn create_undestroyable(name: impl Into<String>, daemon: bool) -> (Self, ShutdownGrant) {
        let group = Self::build(&name.into(), daemon, true);
        let grant = ShutdownGrant::new(group.inner.owner_id);
        (group, grant)
    }

    fn build(name: &str, daemon: bool, undestroyable: bool) -> Self {
        let band_executor = |band: Band| {
            QueuedExecutor::with_options(ExecutorOptions {
                name: format!("{name}-{}", band.label()),
                default_priority: band.level(),
                daemon,
                logging_threshold: band.logging_threshold(),
            })
        };
        let bands = BandSet {
            low: band_executor(Band::Low),
            normal: band_executor(Band::Normal),
            high: band_executor(Band::High),
        };
        Self {
            inner: Arc::new(GroupInner {
                name: name.to_string(),
                undestroyable,
                owner_id: super::NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
                bands: Mutex::new(Some(bands)),
            }),
        }
    }

    /// Builds an action task routed to the band clamped from `priority`.
    #[must_use]
    pub fn create_action<F>(&self, f: F, priority: u8) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        let band = Band::for_level(priority);
        let core = TaskCore::new(Box::new(f), ExecutionMode::Sync, band.level());
        Task::new(core, SubmitTarget::Group(Arc::clone(&self.inner)))
    }

    /// Builds a producer task routed to the band clamped from `priority`.
    #[must_use]
    pub fn create_producer<T, F>(&self, f: F, priority: u8) -> ProducerTask<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let band = Band::for_level(priority);
        let (core, slot) = producer_parts(f, ExecutionMode::Sync, band.level());
        ProducerTask::new(core, slot, SubmitTarget::Group(Arc::clone(&self.inner)))
    }

    /// Blocks until `task` is finished (at NORMAL priority).
    pub fn wait_for<W: Waitable>(&self, task: &W) {
        self.wait_for_with_priority(task, priority::NORMAL);
    }

    /// Blocks until `task` is finished, first moving it to the band clamped
    /// from `priority` if it differs.
    pub fn wait_for_with_priority<W: Waitable>(&self, task: &W, priority: u8) {
        let clamped = Band::for_level(priority).level();
        if task.priority() != clamped {
            task.change_priority(clamped);
        }
        task.join();
    }

    /// Waits for every band to drain (destination band NORMAL).
    pub fn wait_for_all(&self) {
        self.wait_for_all_with_priority(priority::NORMAL);
    }

    /// Waits for every band to drain.
    ///
    /// The band clamped from `priority` is waited on last, so tasks arriving
    /// in the other bands while the waiter progresses cannot starve it.
    pub fn wait_for_all_with_priority(&self, priority: u8) {
        let destination = Band::for_level(priority);
        for band in Band::ALL {
            if band != destination {
                if let Some(inner) = self.inner.band_inner(band) {
                    super::wait_for_all(&inner, priority);
                }
            }
        }
        if let Some(inner) = self.inner.band_inner(destination) {
            super::wait_for_all(&inner, priority);
        }
    }

    /// Suspends every band; see
    /// [`QueuedExecutor::suspend_with_priority`].
    ///
    /// In the non-immediate form each band gets its own suspension sentinel,
    /// enqueued in that band.
    pub fn suspend_all(&self, immediate: bool) {
        self.suspend_all_with_priority(immediate, priority::NORMAL);
    }

    /// Suspends every band at the given priority.
    pub fn suspend_all_with_priority(&self, immediate: bool, priority: u8) {
        for band in Band::ALL {
            if let Some(inner) = self.inner.band_inner(band) {
                super::suspend(&inner, immediate, priority);
            }
        }
    }

    /// Resumes every band.
    pub fn resume_all(&self) {
        for band in Band::ALL {
            if let Some(inner) = self.inner.band_inner(band) {
                super::resume(&inner);
            }
        }
    }

    /// Number of tasks queued in the given band.
    #[must_use]
    pub fn queued_count(&self, band: Band) -> usize {
        self.inner
            .band_inner(band)
            .map_or(0, |inner| inner.queue().len())
    }

    /// Whether the group has been shut down.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner
            .bands
            .lock()
            .expect("band map poisoned")
            .is_none()
    }

    /// Shuts down all three bands, then clears the band map. Returns
    /// `false` without side effects on an undestroyable group.
    pub fn shut_down(&self, wait_for_tasks_termination: bool) -> bool {
        if self.inner.undestroyable {
            return false;
        }
        shut_down_group(&self.inner, wait_for_tasks_termination)
    }

    /// [`shut_down`](Self::shut_down) for undestroyable groups, gated on
    /// the construction-time grant.
    pub fn shut_down_authorized(
        &self,
        grant: &ShutdownGrant,
        wait_for_tasks_termination: bool,
    ) -> bool {
        if !grant.authorizes(self.inner.owner_id) {
            return false;
        }
        shut_down_group(&self.inner, wait_for_tasks_termination)
    }

    /// Group name; band workers are named `{name}-{band}`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl Drop for ExecutorGroup {
    fn drop(&mut self) {
        // Owner is gone; stop the bands after their current tasks.
        let _ = shut_down_group(&self.inner, false);
    }
}

fn shut_down_group(inner: &Arc<GroupInner>, wait_for_tasks_termination: bool) -> bool {
    let bands = inner.bands.lock().expect("band map poisoned").take();
    let Some(bands) = bands else {
        return true;
    };
    for band in Band::ALL {
        super::shut_down(bands.executor(band).inner(), wait_for_tasks_termination);
    }
    true
}

/// Routes a submission to the band matching the task's clamped priority.
pub(crate) fn submit_to_band(
    group: &Arc<GroupInner>,
    core: &Arc<TaskCore>,
    result: Option<Arc<dyn Any + Send + Sync>>,
) -> bool {
    match group.band_inner(Band::for_level(core.priority())) {
        Some(inner) => super::submit(&inner, core, result),
        None => false,
    }
}

/// Re-routes a queued task to the band matching the new clamped priority.
///
/// Removal happens under the task's own monitor; if the worker already
/// dequeued the task, the change degrades to a scheduling hint and the task
/// is not moved.
pub(crate) fn change_priority(group: &Arc<GroupInner>, core: &Arc<TaskCore>, priority: u8) {
    let new_level = Band::for_level(priority).level();
    let old_level = core.priority();
    if new_level == old_level {
        return;
    }
    let old_inner = group.band_inner(Band::for_level(old_level));
    let new_inner = group.band_inner(Band::for_level(new_level));
    let (Some(old_inner), Some(new_inner)) = (old_inner, new_inner) else {
        return;
    };
    let moved = {
        let mut state = core.lock();
        if !state.phase.is_mutable() {
            return;
        }
        state.priority = new_level;
        if state.phase == Phase::Queued && old_inner.queue().remove(core.id()) {
            state.binding = Binding::Worker(new_inner.worker_tid());
            new_inner.queue().push_back(Arc::clone(core));
            true
        } else {
            false
        }
    };
    if moved {
        new_inner
            .monitors()
            .get(super::EXECUTABLE_COLLECTION_FILLER)
            .notify_all();
    }
}
