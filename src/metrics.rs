//! Executor metrics.
//!
//! Each executor publishes two monotonically increasing counters: completed
//! sync tasks and completed async tasks. Every `logging_threshold`-th
//! completion emits an info record through
//! [`tracing_compat`](crate::tracing_compat).

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1 and returns the new value.
    pub fn bump(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the counter name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Completion counters published by one executor.
#[derive(Debug)]
pub struct ExecutorMetrics {
    sync_completed: Counter,
    async_completed: Counter,
}

impl ExecutorMetrics {
    pub(crate) const fn new() -> Self {
        Self {
            sync_completed: Counter::new("sync_completed"),
            async_completed: Counter::new("async_completed"),
        }
    }

    /// Tasks completed on the queue worker.
    #[must_use]
    pub const fn sync_completed(&self) -> &Counter {
        &self.sync_completed
    }

    /// Tasks completed on dedicated async contexts.
    #[must_use]
    pub const fn async_completed(&self) -> &Counter {
        &self.async_completed
    }

    /// Total completed tasks across both modes.
    #[must_use]
    pub fn total_completed(&self) -> u64 {
        self.sync_completed.get() + self.async_completed.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_returns_the_new_value() {
        let counter = Counter::new("test");
        assert_eq!(counter.bump(), 1);
        assert_eq!(counter.bump(), 2);
        assert_eq!(counter.get(), 2);
        assert_eq!(counter.name(), "test");
    }

    #[test]
    fn add_accumulates() {
        let counter = Counter::new("test");
        counter.add(5);
        counter.add(3);
        assert_eq!(counter.get(), 8);
    }

    #[test]
    fn totals_combine_both_modes() {
        let metrics = ExecutorMetrics::new();
        metrics.sync_completed().add(2);
        metrics.async_completed().add(3);
        assert_eq!(metrics.total_completed(), 5);
    }
}
