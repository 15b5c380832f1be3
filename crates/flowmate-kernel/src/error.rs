//! Kernel error types.
//!
//! The scheduler surfaces errors through [`KernelError`].
//! Each variant carries enough context for callers to decide how to handle
//! the failure without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the Flowmate kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Scheduler errors ---------------------------------------------------
    /// The referenced task does not exist in the scheduler.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The [`Uuid`] that was looked up.
        task_id: Uuid,
    },

    /// The task has already started, finished or been cancelled and cannot
    /// be transitioned to the requested state.
    #[error("invalid task state transition for {task_id}: {reason}")]
    InvalidTaskState { task_id: Uuid, reason: String },

    /// The scheduler has been shut down and will not accept new work.
    #[error("scheduler is shut down")]
    SchedulerShutdown,
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
