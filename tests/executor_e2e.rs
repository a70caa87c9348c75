//! End-to-end tests for the single-queue executor: FIFO ordering,
//! producer results, suspend/resume, async dispatch, and shutdown.

mod common;

use common::{init_test_logging, wait_until};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use taskband::{priority, ExecutionMode, ExecutorOptions, QueuedExecutor};

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let writer = {
        let log = Arc::clone(&log);
        move |entry: &str| log.lock().expect("log poisoned").push(entry.to_string())
    };
    (log, writer)
}

#[test]
fn fifo_within_one_executor() {
    init_test_logging();
    let executor = QueuedExecutor::create("fifo", priority::NORMAL);
    let (log, write) = recorder();

    for label in ["A", "B", "C"] {
        let write = write.clone();
        let _ = executor.create_action(move || write(label)).submit();
    }
    executor.wait_for_all();

    assert_eq!(*log.lock().expect("log poisoned"), vec!["A", "B", "C"]);
    assert!(executor.shut_down(true));
}

#[test]
fn producer_result_round_trip() {
    init_test_logging();
    let executor = QueuedExecutor::create("producer", priority::NORMAL);

    let task = executor
        .create_producer(|| 42)
        .with_priority(priority::HIGH)
        .submit();

    assert_eq!(task.join().expect("producer result"), 42);
    assert!(task.finished());
    assert!(task.error().is_none());
    assert_eq!(task.result(), Some(42));
    // The result stays stable for later joins (P2).
    assert_eq!(task.join().expect("stable result"), 42);
    assert!(executor.shut_down(true));
}

#[test]
fn producer_panic_surfaces_on_join() {
    init_test_logging();
    let executor = QueuedExecutor::create("producer_panic", priority::NORMAL);

    let task = executor
        .create_producer::<u32, _>(|| panic!("no answer"))
        .submit();

    let error = task.join().expect_err("panic surfaces as error");
    assert!(error.is_panic());
    assert_eq!(error.context(), Some("no answer"));
    assert!(task.finished());
    assert!(task.ended_with_errors());
    assert!(executor.shut_down(true));
}

#[test]
fn action_panic_does_not_kill_the_worker() {
    init_test_logging();
    let executor = QueuedExecutor::create("action_panic", priority::NORMAL);
    let (log, write) = recorder();

    let failing = executor.create_action(|| panic!("boom")).submit();
    let surviving = {
        let write = write.clone();
        executor.create_action(move || write("after")).submit()
    };
    executor.wait_for_all();

    assert!(failing.ended_with_errors());
    assert!(!surviving.ended_with_errors());
    assert_eq!(*log.lock().expect("log poisoned"), vec!["after"]);
    assert!(executor.shut_down(true));
}

#[test]
fn suspend_immediate_pauses_between_tasks() {
    init_test_logging();
    let executor = QueuedExecutor::create("suspend", priority::NORMAL);
    let (log, write) = recorder();

    let first = {
        let write = write.clone();
        executor
            .create_action(move || {
                thread::sleep(Duration::from_millis(200));
                write("1");
            })
            .submit()
    };
    // Let the first task start.
    thread::sleep(Duration::from_millis(50));
    let second = {
        let write = write.clone();
        executor.create_action(move || write("2")).submit()
    };

    executor.suspend(true);

    // Paused after the first task; the second has not started.
    assert!(first.finished());
    assert!(executor.is_suspended());
    assert_eq!(*log.lock().expect("log poisoned"), vec!["1"]);
    assert!(!second.finished());

    executor.resume();
    executor.wait_for_all();
    assert_eq!(*log.lock().expect("log poisoned"), vec!["1", "2"]);
    assert!(executor.shut_down(true));
}

#[test]
fn suspend_with_sentinel_runs_earlier_tasks_first() {
    init_test_logging();
    let executor = QueuedExecutor::create("sentinel", priority::NORMAL);
    let (log, write) = recorder();

    // Park the worker so the sentinel lands behind both tasks.
    executor.suspend(true);
    for label in ["a", "b"] {
        let write = write.clone();
        let _ = executor.create_action(move || write(label)).submit();
    }
    executor.suspend_with_priority(false, priority::HIGH);
    executor.resume();

    assert!(wait_until(Duration::from_secs(2), || executor.is_suspended()));
    assert_eq!(*log.lock().expect("log poisoned"), vec!["a", "b"]);

    // Tasks after the sentinel wait for resume.
    let late = {
        let write = write.clone();
        executor.create_action(move || write("late")).submit()
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!late.finished());
    executor.resume();
    executor.wait_for_all();
    assert!(late.finished());
    assert!(executor.shut_down(true));
}

#[test]
fn suspend_waits_for_async_in_flight() {
    init_test_logging();
    let executor = QueuedExecutor::create("suspend_async", priority::NORMAL);
    let done = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&done);
    let _ = executor
        .create_action(move || {
            thread::sleep(Duration::from_millis(150));
            flag.store(true, Ordering::SeqCst);
        })
        .with_mode(ExecutionMode::Async)
        .submit();

    // Let the worker dispatch the async context.
    thread::sleep(Duration::from_millis(50));
    executor.suspend(true);
    assert!(done.load(Ordering::SeqCst), "suspend returned before the async task finished");

    executor.resume();
    assert!(executor.shut_down(true));
}

#[test]
fn async_tasks_run_on_dedicated_contexts() {
    init_test_logging();
    let executor = QueuedExecutor::create("async-exec", priority::NORMAL);
    let context_name = Arc::new(Mutex::new(String::new()));

    let sink = Arc::clone(&context_name);
    let task = executor
        .create_action(move || {
            let name = thread::current().name().unwrap_or_default().to_string();
            *sink.lock().expect("name slot poisoned") = name;
        })
        .with_mode(ExecutionMode::Async)
        .submit();
    executor.wait_for_all();
    task.join();

    let name = context_name.lock().expect("name slot poisoned").clone();
    assert!(
        name.starts_with("async-exec-async-"),
        "async task ran on {name:?}"
    );
    assert_eq!(executor.metrics().async_completed().get(), 1);
    assert_eq!(executor.metrics().sync_completed().get(), 0);
    assert!(executor.shut_down(true));
}

#[test]
fn mode_change_while_queued_rebinds_dispatch() {
    init_test_logging();
    let executor = QueuedExecutor::create("mode-flip", priority::NORMAL);
    executor.suspend(true);

    let context_name = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&context_name);
    let task = executor
        .create_action(move || {
            let name = thread::current().name().unwrap_or_default().to_string();
            *sink.lock().expect("name slot poisoned") = name;
        })
        .submit();
    assert_eq!(task.mode(), ExecutionMode::Sync);
    task.set_mode(ExecutionMode::Async);
    assert_eq!(task.mode(), ExecutionMode::Async);

    executor.resume();
    executor.wait_for_all();
    let name = context_name.lock().expect("name slot poisoned").clone();
    assert!(name.starts_with("mode-flip-async-"), "ran on {name:?}");
    assert!(executor.shut_down(true));
}

#[test]
fn wait_for_raises_only_tasks_ahead_of_the_target() {
    init_test_logging();
    let executor = QueuedExecutor::create("inheritance", priority::NORMAL);
    // Park the worker so the queue holds still while priorities are raised.
    executor.suspend(true);

    let first = executor.create_action(|| {}).submit();
    let second = executor.create_action(|| {}).submit();
    let target = executor.create_action(|| {}).submit();
    let behind = executor.create_action(|| {}).submit();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(100));
            executor.resume();
        });
        executor.wait_for_with_priority(&target, priority::HIGH);
    });

    assert!(target.finished());
    // Tasks strictly ahead of the target inherited the waiter's priority;
    // the target itself and tasks behind it did not (break-on-target).
    assert_eq!(first.priority(), priority::HIGH);
    assert_eq!(second.priority(), priority::HIGH);
    assert_eq!(target.priority(), priority::NORMAL);
    assert_eq!(behind.priority(), priority::NORMAL);

    executor.wait_for_all();
    assert!(behind.finished());
    assert!(executor.shut_down(true));
}

#[test]
fn shutdown_without_wait_clears_pending_tasks() {
    init_test_logging();
    let executor = QueuedExecutor::create("fast-shutdown", priority::NORMAL);
    let executed = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let executed = Arc::clone(&executed);
            executor
                .create_action(move || {
                    thread::sleep(Duration::from_millis(20));
                    executed.fetch_add(1, Ordering::SeqCst);
                })
                .submit()
        })
        .collect();

    assert!(executor.shut_down(false));
    assert!(executor.is_terminated());

    let ran = executed.load(Ordering::SeqCst);
    assert!(ran <= 1, "expected at most one task to run, got {ran}");

    // Cleared tasks are finished with a terminated error and join without
    // blocking.
    let mut terminated = 0;
    for task in &tasks {
        task.join();
        assert!(task.finished());
        if task.error().is_some_and(|error| error.is_terminated()) {
            terminated += 1;
        }
    }
    assert_eq!(terminated, 10 - ran);

    // Submissions after shutdown are rejected.
    let refused = executor.create_action(|| unreachable!("must not run")).submit();
    assert!(!refused.finished());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(executed.load(Ordering::SeqCst), ran);
    assert_eq!(executor.queued_count(), 0);
}

#[test]
fn shutdown_with_wait_runs_everything_first() {
    init_test_logging();
    let executor = QueuedExecutor::create("orderly-shutdown", priority::NORMAL);
    let executed = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let executed = Arc::clone(&executed);
        let _ = executor
            .create_action(move || {
                executed.fetch_add(1, Ordering::SeqCst);
            })
            .submit();
    }

    assert!(executor.shut_down(true));
    assert_eq!(executed.load(Ordering::SeqCst), 5);
    assert!(executor.is_terminated());
    // Five user tasks plus the terminator ran on the worker.
    assert_eq!(executor.metrics().sync_completed().get(), 6);
}

#[test]
fn wait_for_all_covers_async_stragglers() {
    init_test_logging();
    let executor = QueuedExecutor::create("straggler", priority::NORMAL);
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let done = Arc::clone(&done);
        let _ = executor
            .create_action(move || {
                thread::sleep(Duration::from_millis(60));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .with_mode(ExecutionMode::Async)
            .submit();
    }
    executor.wait_for_all();
    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert!(executor.shut_down(true));
}

#[test]
fn change_default_priority_applies_to_queued_tasks() {
    init_test_logging();
    let executor = QueuedExecutor::create("retune", priority::NORMAL);
    executor.suspend(true);

    let queued = executor.create_action(|| {}).submit();
    assert_eq!(queued.priority(), priority::NORMAL);
    executor.change_default_priority(priority::HIGH);
    assert_eq!(queued.priority(), priority::HIGH);
    assert_eq!(executor.default_priority(), priority::HIGH);

    // New tasks pick up the new default.
    let fresh = executor.create_action(|| {});
    assert_eq!(fresh.priority(), priority::HIGH);
    let fresh = fresh.submit();

    executor.resume();
    executor.wait_for_all();
    assert!(queued.finished() && fresh.finished());
    assert!(executor.shut_down(true));
}

#[test]
fn logging_threshold_is_normalized() {
    init_test_logging();
    let mut options = ExecutorOptions::new("threshold", priority::NORMAL);
    options.logging_threshold = 0;
    let executor = QueuedExecutor::with_options(options);
    let _ = executor.create_action(|| {}).submit();
    executor.wait_for_all();
    assert_eq!(executor.metrics().sync_completed().get(), 1);
    assert!(executor.shut_down(true));
}
