//! Taskband: a priority-banded queued task executor.
//!
//! # Overview
//!
//! Taskband accepts user-submitted units of work (run-and-forget actions
//! and value-producing tasks), queues them per priority, and drives them
//! through a cooperative lifecycle: suspend/resume, priority re-ordering,
//! run-only-once de-duplication, synchronous and asynchronous dispatch,
//! graceful shutdown, and waiter coordination.
//!
//! # Core Guarantees
//!
//! - **FIFO within a band**: task start order equals submission order on one
//!   executor, modulo run-once collapsing
//! - **Strict band preference**: a group's HIGH band never waits behind
//!   NORMAL or LOW (each band owns an independent worker)
//! - **Stable completion**: once a task is finished, its result and error
//!   are stable and readable by any waiter
//! - **At most one execution per run-once identity**, process-wide
//! - **No error propagation across task boundaries**: panics are captured
//!   on the task and surfaced to joiners, never to the worker
//!
//! # Module Structure
//!
//! - [`executor`]: single-queue executor, executor group, task queue
//! - [`task`]: task handles (actions and producers), execution modes
//! - [`priority`]: priority levels, band classification and clamping
//! - [`run_once`]: process-wide run-once identity registry
//! - [`sync`]: named condition monitors for handshakes
//! - [`metrics`]: per-executor completion counters
//! - [`error`]: error types
//! - [`tracing_compat`]: feature-gated logging shim
//!
//! # Example
//!
//! ```
//! use taskband::{priority, QueuedExecutor};
//!
//! let executor = QueuedExecutor::create("worker", priority::NORMAL);
//! let task = executor.create_producer(|| 21 * 2).submit();
//! assert_eq!(task.join().expect("produced"), 42);
//! executor.wait_for_all();
//! assert!(executor.shut_down(true));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod executor;
pub mod metrics;
pub mod priority;
pub mod run_once;
pub mod sync;
pub mod task;
pub mod tracing_compat;

// Re-exports for convenient access to core types
pub use error::{Error, ErrorKind, Result};
pub use executor::group::ExecutorGroup;
pub use executor::{ExecutorOptions, QueuedExecutor, ShutdownGrant};
pub use metrics::{Counter, ExecutorMetrics};
pub use priority::Band;
pub use sync::{Monitor, MonitorRegistry};
pub use task::{ExecutionMode, ProducerTask, Task, Waitable};
