//! The ordered task queue drained by one worker.

use crate::task::core::TaskCore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// An insertion-ordered task sequence supporting removal by identity.
///
/// Writers are submitters, the worker's claim step, and the priority-change
/// re-route path; the latter two remove under the target task's own monitor
/// so a dequeue cannot race a re-route and drop the task.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    items: Mutex<VecDeque<Arc<TaskCore>>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_back(&self, task: Arc<TaskCore>) {
        self.lock().push_back(task);
    }

    /// The head task, if any, without removing it.
    pub(crate) fn front(&self) -> Option<Arc<TaskCore>> {
        self.lock().front().map(Arc::clone)
    }

    /// Removes the task with the given identity. Returns false if it was
    /// already dequeued (or re-routed away).
    pub(crate) fn remove(&self, task_id: u64) -> bool {
        let mut items = self.lock();
        match items.iter().position(|task| task.id() == task_id) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Stable copy of the current contents, in queue order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<TaskCore>> {
        self.lock().iter().map(Arc::clone).collect()
    }

    /// Empties the queue, returning the removed tasks in queue order.
    pub(crate) fn drain(&self) -> Vec<Arc<TaskCore>> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<TaskCore>>> {
        self.items.lock().expect("task queue poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ExecutionMode;

    fn task() -> Arc<TaskCore> {
        TaskCore::new(Box::new(|| {}), ExecutionMode::Sync, 5)
    }

    #[test]
    fn preserves_insertion_order() {
        let queue = TaskQueue::new();
        let (a, b, c) = (task(), task(), task());
        queue.push_back(Arc::clone(&a));
        queue.push_back(Arc::clone(&b));
        queue.push_back(Arc::clone(&c));

        let order: Vec<u64> = queue.snapshot().iter().map(|t| t.id()).collect();
        assert_eq!(order, vec![a.id(), b.id(), c.id()]);
        assert_eq!(queue.front().map(|t| t.id()), Some(a.id()));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn remove_by_identity() {
        let queue = TaskQueue::new();
        let (a, b) = (task(), task());
        queue.push_back(Arc::clone(&a));
        queue.push_back(Arc::clone(&b));

        assert!(queue.remove(a.id()));
        assert!(!queue.remove(a.id()));
        assert_eq!(queue.front().map(|t| t.id()), Some(b.id()));
    }

    #[test]
    fn drain_empties_in_order() {
        let queue = TaskQueue::new();
        let (a, b) = (task(), task());
        queue.push_back(Arc::clone(&a));
        queue.push_back(Arc::clone(&b));

        let drained: Vec<u64> = queue.drain().iter().map(|t| t.id()).collect();
        assert_eq!(drained, vec![a.id(), b.id()]);
        assert!(queue.is_empty());
    }
}
