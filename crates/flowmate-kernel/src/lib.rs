//! Flowmate runtime core.
//!
//! This crate provides the two services every simulated workflow relies on:
//!
//! - **[`scheduler`]** -- Single-lane task queue built on
//!   [`crossbeam::queue::SegQueue`].  One background worker executes tasks
//!   strictly one at a time, so every timed transition shares a single
//!   cooperative timeline.  Tasks are cancellable until they start and
//!   awaitable until they finish.
//! - **[`ipc`]** -- Publish/subscribe event bus backed by
//!   [`tokio::sync::broadcast`], used to surface chat and staging progress to
//!   whatever is rendering it.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].

pub mod error;
pub mod ipc;
pub mod scheduler;

pub use error::{KernelError, Result};
pub use ipc::{Event, IpcBus};
pub use scheduler::{SchedulePolicy, Scheduler, TaskFn, TaskId, TaskInfo, TaskStatus};
