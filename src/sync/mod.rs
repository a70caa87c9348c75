//! Synchronization primitives for worker/submitter/waiter handshakes.
//!
//! The executor coordinates its worker, submitters, and waiters through a
//! small set of *named monitors*: lock/condvar pairs interned by string key
//! and owned by the executor (`resume_caller`,
//! `executable_collection_filler`, `executing_finished_waiter`,
//! `suspension_caller`). A monitor is never held across a task body; only
//! across short protocol handshakes (enqueue/notify, suspend/observe,
//! idle/wake).

mod monitor;

pub use monitor::{Monitor, MonitorRegistry};
