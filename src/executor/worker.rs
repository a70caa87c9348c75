//! The executor's worker loop.
//!
//! One worker thread per executor, alternating between DRAINING (the queue
//! has tasks) and IDLE (parked on `executable_collection_filler`). The drain
//! loop claims the head task under the task's own monitor, serializing with
//! submitters and priority re-routers; a claim that loses the race simply
//! moves on.

use super::{
    ExecutorInner, EXECUTABLE_COLLECTION_FILLER, EXECUTING_FINISHED_WAITER, RESUME_CALLER,
    SUSPENSION_CALLER,
};
use crate::task::core::{Binding, Phase, TaskCore};
use crate::task::ExecutionMode;
use crate::tracing_compat::{debug, info, warn};
use std::sync::Arc;
use std::thread;

pub(super) fn run_loop(inner: &Arc<ExecutorInner>) {
    debug!("executor '{}' worker started", inner.name());
    while !inner.is_terminated() {
        if inner.queue().is_empty() {
            inner.monitors().get(EXECUTING_FINISHED_WAITER).notify_all();
            inner
                .monitors()
                .get(EXECUTABLE_COLLECTION_FILLER)
                .wait_while(|| inner.queue().is_empty() && !inner.is_terminated());
        } else {
            drain(inner);
        }
    }
    debug!("executor '{}' worker stopped", inner.name());
}

fn drain(inner: &Arc<ExecutorInner>) {
    loop {
        if inner.is_terminated() {
            return;
        }
        if inner.is_suspended() {
            inner
                .monitors()
                .get(RESUME_CALLER)
                .wait_while(|| inner.is_suspended() && !inner.is_terminated());
            // Restart the outer loop after a suspension.
            return;
        }
        let Some(task) = inner.queue().front() else {
            return;
        };
        inner.set_current(Arc::clone(&task));
        // Claim under the task monitor: a concurrent re-route that already
        // removed the task wins, and we move to the next head.
        let claimed = {
            let mut state = task.lock();
            if inner.queue().remove(task.id()) {
                state.phase = Phase::Running;
                if state.mode == ExecutionMode::Async {
                    state.binding = Binding::Dedicated(None);
                }
                Some((state.mode, state.priority))
            } else {
                None
            }
        };
        let Some((mode, priority)) = claimed else {
            continue;
        };
        if inner.worker_priority() != priority {
            inner.set_worker_priority(priority);
        }
        match mode {
            ExecutionMode::Sync => {
                task.execute();
                let completed = inner.metrics().sync_completed().bump();
                if completed % inner.logging_threshold() == 0 {
                    info!("Executed {} sync tasks", completed);
                }
            }
            ExecutionMode::Async => dispatch_async(inner, task),
        }
        inner.set_worker_priority(inner.default_priority());
        inner.monitors().get(SUSPENSION_CALLER).notify_all();
    }
}

/// Launches the dedicated context for an async task.
///
/// The worker accounts the dispatch (the task enters the async-in-flight set
/// here, not in the context thread) so suspension and wait-for-all observers
/// never miss a just-dispatched task.
fn dispatch_async(inner: &Arc<ExecutorInner>, task: Arc<TaskCore>) {
    inner.async_push(Arc::clone(&task));
    let context_name = format!("{}-async-{}", inner.name(), inner.next_async_seq());
    let context_inner = Arc::clone(inner);
    let context_task = Arc::clone(&task);
    let spawned = thread::Builder::new().name(context_name).spawn(move || {
        context_task.execute();
        context_inner.async_remove(context_task.id());
        let completed = context_inner.metrics().async_completed().bump();
        if completed % context_inner.logging_threshold() == 0 {
            info!("Executed {} async tasks", completed);
        }
        context_inner
            .monitors()
            .get(SUSPENSION_CALLER)
            .notify_all();
    });
    if let Err(_spawn_error) = spawned {
        warn!(
            "executor '{}' failed to spawn async context, running inline: {}",
            inner.name(),
            _spawn_error
        );
        task.execute();
        inner.async_remove(task.id());
        let completed = inner.metrics().async_completed().bump();
        if completed % inner.logging_threshold() == 0 {
            info!("Executed {} async tasks", completed);
        }
    }
}
