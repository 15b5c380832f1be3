//! Intent classification and workflow staging for Flowmate.
//!
//! This crate provides:
//!
//! - **Intent classification**: ordered keyword rules mapping free text to a
//!   workflow template via [`classifier::IntentClassifier`].
//! - **Suggestions and templates**: the [`suggestion::WorkflowSuggestion`]
//!   model plus the fixed template set and prefilled catalog in
//!   [`templates`].
//! - **Tool connections**: session-owned [`tools::ToolConnections`] and the
//!   simulated [`tools::ToolConnector`].
//! - **Staging**: the connect -> permissions -> test state machine in
//!   [`staging::StagingSequencer`], driven by the kernel scheduler.
//! - **Schedules**: cron validation for custom card schedules in
//!   [`schedule`].

pub mod classifier;
pub mod error;
pub mod schedule;
pub mod staging;
pub mod suggestion;
pub mod templates;
pub mod tools;

pub use classifier::IntentClassifier;
pub use error::{IntentError, Result};
pub use staging::{ConnectMode, Stage, StageStatus, StagingConfig, StagingSequencer, StagingState};
pub use suggestion::{Trigger, UNRESOLVED_TOOL, WorkflowSuggestion};
pub use templates::{PrefilledTemplate, Template};
pub use tools::{ToolConnections, ToolConnector};
