//! Named condition monitors.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

/// A lock/condvar pair used for wait/notify handshakes.
///
/// The monitor carries no data of its own; the condition it guards lives in
/// the caller's state (atomics, queues). To avoid lost wakeups, callers must
/// follow the usual protocol: waiters re-check the condition under the
/// monitor lock via [`wait_while`](Self::wait_while), and notifiers that
/// mutate the condition do so under the same lock via
/// [`signal_all`](Self::signal_all).
#[derive(Debug, Default)]
pub struct Monitor {
    gate: Mutex<()>,
    cond: Condvar,
}

impl Monitor {
    /// Creates a new monitor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Parks the calling thread while `condition` returns true.
    ///
    /// The condition is evaluated under the monitor lock, so a notifier
    /// using [`signal_all`](Self::signal_all) cannot slip a state change
    /// between the check and the park. Spurious wakeups are absorbed by the
    /// re-check loop.
    pub fn wait_while<F>(&self, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        let mut guard = self.gate.lock().expect("monitor poisoned");
        while condition() {
            guard = self.cond.wait(guard).expect("monitor poisoned");
        }
        drop(guard);
    }

    /// Wakes every thread parked on this monitor.
    pub fn notify_all(&self) {
        let _guard = self.gate.lock().expect("monitor poisoned");
        self.cond.notify_all();
    }

    /// Runs `mutate` under the monitor lock, then wakes every parked thread.
    ///
    /// Use this when flipping the condition a waiter checks, so the flip and
    /// the notification are atomic with respect to [`wait_while`].
    pub fn signal_all<F>(&self, mutate: F)
    where
        F: FnOnce(),
    {
        let _guard = self.gate.lock().expect("monitor poisoned");
        mutate();
        self.cond.notify_all();
    }
}

/// A table of monitors interned by string key.
///
/// `get` returns the same [`Monitor`] instance for equal keys (reference
/// equality on the returned `Arc`). The table is owned by a host executor;
/// entries are removed only at host teardown via [`clear`](Self::clear), and
/// hosts must quiesce users before tearing down.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    table: parking_lot::Mutex<HashMap<String, Arc<Monitor>>>,
}

impl MonitorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the monitor interned for `key`, creating it on first use.
    #[must_use]
    pub fn get(&self, key: &str) -> Arc<Monitor> {
        let mut table = self.table.lock();
        if let Some(monitor) = table.get(key) {
            return Arc::clone(monitor);
        }
        let monitor = Arc::new(Monitor::new());
        table.insert(key.to_string(), Arc::clone(&monitor));
        monitor
    }

    /// Number of interned monitors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if no monitor has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Drops every interned monitor. Host-teardown only.
    pub fn clear(&self) {
        self.table.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn equal_keys_intern_the_same_monitor() {
        let registry = MonitorRegistry::new();
        let a = registry.get("resume_caller");
        let b = registry.get("resume_caller");
        let c = registry.get("suspension_caller");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn clear_empties_the_table() {
        let registry = MonitorRegistry::new();
        let _ = registry.get("executing_finished_waiter");
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn signal_all_wakes_wait_while() {
        let monitor = Arc::new(Monitor::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let monitor = Arc::clone(&monitor);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                monitor.wait_while(|| !flag.load(Ordering::Acquire));
            })
        };

        thread::sleep(Duration::from_millis(20));
        monitor.signal_all(|| flag.store(true, Ordering::Release));
        waiter.join().expect("waiter panicked");
    }

    #[test]
    fn wait_while_returns_immediately_when_condition_false() {
        let monitor = Monitor::new();
        monitor.wait_while(|| false);
    }
}
