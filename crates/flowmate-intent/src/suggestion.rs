//! Workflow suggestion model.
//!
//! A [`WorkflowSuggestion`] is the proposal shown on a card: what starts the
//! workflow, what it does, how often, and which tools it needs.  Suggestions
//! are immutable once built; cards edit a separate draft.

use serde::{Deserialize, Serialize};

/// Placeholder tool name used when the request did not name a service.
///
/// Connecting it is always rejected.
pub const UNRESOLVED_TOOL: &str = "To be determined";

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// What starts a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "label")]
pub enum Trigger {
    /// Fires on a schedule.
    TimeBased,
    /// Fires when a new email arrives.
    NewEmail,
    /// Fires when an external condition is met.
    EventBased,
    /// Free-form trigger entered on a card.
    Custom(String),
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeBased => write!(f, "Time-based"),
            Self::NewEmail => write!(f, "New email received"),
            Self::EventBased => write!(f, "Event-based"),
            Self::Custom(label) => write!(f, "{label}"),
        }
    }
}

impl From<&str> for Trigger {
    /// Map a card label back to a trigger, keeping unknown labels as custom.
    fn from(label: &str) -> Self {
        match label.trim() {
            "Time-based" => Self::TimeBased,
            "New email received" => Self::NewEmail,
            "Event-based" => Self::EventBased,
            other => Self::Custom(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Suggestion
// ---------------------------------------------------------------------------

/// A proposed automation shown to the user for confirmation or editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSuggestion {
    /// What starts the workflow.
    pub trigger: Trigger,
    /// What the workflow does, e.g. "Send Slack message".
    pub action: String,
    /// Human-readable cadence, e.g. "Daily at 9:00 AM".
    pub frequency: String,
    /// Tools that must be connected before activation, in display order.
    pub required_tools: Vec<String>,
    /// Follow-up questions for details the request left out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_info: Vec<String>,
    /// Whether this came from the prefilled catalog rather than the
    /// classifier.
    #[serde(default)]
    pub is_prefilled: bool,
}

impl WorkflowSuggestion {
    /// Create a suggestion with no follow-up questions.
    pub fn new(
        trigger: Trigger,
        action: impl Into<String>,
        frequency: impl Into<String>,
        required_tools: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            trigger,
            action: action.into(),
            frequency: frequency.into(),
            required_tools: required_tools.into_iter().map(Into::into).collect(),
            missing_info: Vec::new(),
            is_prefilled: false,
        }
    }

    /// Attach follow-up questions.
    pub fn with_missing_info(
        mut self,
        prompts: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.missing_info = prompts.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the suggestion as coming from the prefilled catalog.
    pub fn prefilled(mut self) -> Self {
        self.is_prefilled = true;
        self
    }

    /// Whether any required tool is the unresolved placeholder.
    pub fn has_unresolved_tool(&self) -> bool {
        self.required_tools.iter().any(|t| t == UNRESOLVED_TOOL)
    }
}
