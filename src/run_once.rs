//! Process-wide run-once registry.
//!
//! A *run-once identity* is a caller-supplied string naming a logical
//! operation. The first submission of an identity registers its task here;
//! subsequent submissions collapse into that canonical task. The entry is
//! released exactly when the canonical task finishes.
//!
//! The registry is deliberately process-global: identity de-duplicates
//! across every executor in the process, so embedding two otherwise isolated
//! hosts in one process shares this table.

use crate::task::core::TaskCore;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A registered canonical task: its core and, for producers, the shared
/// result slot used by collapsed duplicates to recover the value.
#[derive(Clone)]
pub(crate) struct Registered {
    pub(crate) core: Arc<TaskCore>,
    pub(crate) result: Option<Arc<dyn Any + Send + Sync>>,
}

struct Registry {
    table: parking_lot::Mutex<HashMap<String, Registered>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        table: parking_lot::Mutex::new(HashMap::new()),
    })
}

/// Strict check-and-set: registers `core` as the canonical task for `key`
/// unless another task already holds the identity. Returns true on success.
pub(crate) fn try_register(
    key: &str,
    core: &Arc<TaskCore>,
    result: Option<Arc<dyn Any + Send + Sync>>,
) -> bool {
    let mut table = registry().table.lock();
    if table.contains_key(key) {
        return false;
    }
    table.insert(
        key.to_string(),
        Registered {
            core: Arc::clone(core),
            result,
        },
    );
    true
}

/// Returns the canonical task currently registered for `key`.
pub(crate) fn lookup(key: &str) -> Option<Registered> {
    registry().table.lock().get(key).cloned()
}

/// Releases the entry for `key`, but only if it still names `task_id`.
///
/// The guard matters: a fresh submission may have re-registered the identity
/// between this task finishing and the removal running.
pub(crate) fn remove_if_current(key: &str, task_id: u64) {
    let mut table = registry().table.lock();
    if table.get(key).is_some_and(|entry| entry.core.id() == task_id) {
        table.remove(key);
    }
}

/// Returns true if `key` currently names a pending canonical task.
#[must_use]
pub fn is_pending(key: &str) -> bool {
    registry().table.lock().contains_key(key)
}

/// Number of identities with a pending canonical task.
#[must_use]
pub fn pending_count() -> usize {
    registry().table.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ExecutionMode;

    fn core() -> Arc<TaskCore> {
        TaskCore::new(Box::new(|| {}), ExecutionMode::Sync, 5)
    }

    #[test]
    fn check_and_set_is_strict() {
        let first = core();
        let second = core();
        assert!(try_register("dedup:check_and_set", &first, None));
        assert!(!try_register("dedup:check_and_set", &second, None));
        let entry = lookup("dedup:check_and_set").expect("registered");
        assert_eq!(entry.core.id(), first.id());
        remove_if_current("dedup:check_and_set", first.id());
        assert!(!is_pending("dedup:check_and_set"));
    }

    #[test]
    fn removal_requires_matching_task() {
        let first = core();
        let second = core();
        assert!(try_register("dedup:stale_removal", &first, None));
        // A stale removal from a different task leaves the entry alone
        remove_if_current("dedup:stale_removal", second.id());
        assert!(is_pending("dedup:stale_removal"));
        remove_if_current("dedup:stale_removal", first.id());
        assert!(!is_pending("dedup:stale_removal"));
    }

    #[test]
    fn identity_is_free_again_after_release() {
        let first = core();
        assert!(try_register("dedup:refresh", &first, None));
        remove_if_current("dedup:refresh", first.id());
        let second = core();
        assert!(try_register("dedup:refresh", &second, None));
        remove_if_current("dedup:refresh", second.id());
    }
}
