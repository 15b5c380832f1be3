//! Fixed workflow templates.
//!
//! [`Template`] enumerates the shapes the classifier can produce.  The
//! prefilled catalog offers ready-made suggestions that skip classification.

use serde::{Deserialize, Serialize};

use crate::suggestion::{Trigger, UNRESOLVED_TOOL, WorkflowSuggestion};

/// A workflow shape the classifier can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Recurring Slack message.
    ScheduledSlack,
    /// Forward incoming email as a WhatsApp notification.
    EmailToWhatsApp,
    /// Generic reminder.
    Reminder,
    /// "When X happens, do Y" with the service still unknown.
    Conditional,
}

impl Template {
    /// Build the suggestion this template stands for.
    pub fn suggestion(self) -> WorkflowSuggestion {
        match self {
            Self::ScheduledSlack => WorkflowSuggestion::new(
                Trigger::TimeBased,
                "Send Slack message",
                "Daily at 9:00 AM",
                ["Slack"],
            ),
            Self::EmailToWhatsApp => WorkflowSuggestion::new(
                Trigger::NewEmail,
                "Send WhatsApp notification",
                "Real-time",
                ["Gmail", "WhatsApp"],
            ),
            Self::Reminder => WorkflowSuggestion::new(
                Trigger::TimeBased,
                "Send reminder notification",
                "One-time",
                ["Calendar", "Notifications"],
            )
            .with_missing_info([
                "What should I remind you about, and when?",
                "How would you like to be notified?",
            ]),
            Self::Conditional => WorkflowSuggestion::new(
                Trigger::EventBased,
                "Custom action",
                "When condition is met",
                [UNRESOLVED_TOOL],
            )
            .with_missing_info([
                "Which app or service should trigger this workflow?",
                "What should happen when the condition is met?",
            ]),
        }
    }

    /// Short label for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::ScheduledSlack => "scheduled_slack",
            Self::EmailToWhatsApp => "email_to_whatsapp",
            Self::Reminder => "reminder",
            Self::Conditional => "conditional",
        }
    }
}

// ---------------------------------------------------------------------------
// Prefilled catalog
// ---------------------------------------------------------------------------

/// A ready-made suggestion offered without typing a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefilledTemplate {
    pub title: String,
    pub suggestion: WorkflowSuggestion,
}

/// The quick-start catalog, in display order.
pub fn prefilled_catalog() -> Vec<PrefilledTemplate> {
    vec![
        PrefilledTemplate {
            title: "Daily standup reminder in Slack".into(),
            suggestion: WorkflowSuggestion::new(
                Trigger::TimeBased,
                "Send Slack message",
                "Weekdays at 9:30 AM",
                ["Slack"],
            )
            .prefilled(),
        },
        PrefilledTemplate {
            title: "Forward important emails to WhatsApp".into(),
            suggestion: WorkflowSuggestion::new(
                Trigger::NewEmail,
                "Send WhatsApp notification",
                "Real-time",
                ["Gmail", "WhatsApp"],
            )
            .prefilled(),
        },
        PrefilledTemplate {
            title: "Weekly calendar digest".into(),
            suggestion: WorkflowSuggestion::new(
                Trigger::TimeBased,
                "Email a summary of next week's events",
                "Every Monday at 8:00 AM",
                ["Calendar", "Gmail"],
            )
            .prefilled(),
        },
    ]
}
