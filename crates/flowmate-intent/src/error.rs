//! Intent engine error types.
//!
//! All intent subsystems surface errors through [`IntentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.

/// Unified error type for the intent crate.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Classifier errors ---------------------------------------------------
    /// The keyword automaton could not be built.
    #[error("failed to build keyword matcher: {reason}")]
    ClassifierBuild { reason: String },

    // -- Tool errors ----------------------------------------------------------
    /// A simulated tool connection was rejected.
    #[error("connection to `{tool}` rejected: {reason}")]
    ConnectionRejected { tool: String, reason: String },

    /// A tool connection was cancelled before it finished.
    #[error("connection to `{tool}` was cancelled")]
    ConnectionCancelled { tool: String },

    // -- Staging errors -------------------------------------------------------
    /// Required tools are still disconnected.
    #[error("required tools not connected: {}", missing.join(", "))]
    ToolsNotConnected { missing: Vec<String> },

    /// A stage transition is already in flight on this card.
    #[error("staging already in progress ({stage})")]
    StagingBusy { stage: String },

    /// The in-flight stage transition was cancelled.
    #[error("{stage} stage was cancelled")]
    StagingCancelled { stage: String },

    // -- Schedule errors ------------------------------------------------------
    /// A cron expression is invalid.
    #[error("invalid schedule `{expression}`: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    // -- Upstream crate errors ------------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] flowmate_kernel::KernelError),

    // -- Generic --------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal intent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_not_connected_lists_every_tool() {
        let err = IntentError::ToolsNotConnected {
            missing: vec!["Gmail".into(), "WhatsApp".into()],
        };
        assert_eq!(
            err.to_string(),
            "required tools not connected: Gmail, WhatsApp"
        );
    }

    #[test]
    fn kernel_error_converts() {
        let err: IntentError = flowmate_kernel::KernelError::SchedulerShutdown.into();
        assert!(matches!(err, IntentError::Kernel(_)));
    }
}
