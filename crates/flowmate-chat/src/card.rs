//! Workflow cards.
//!
//! Every assistant message that carries a suggestion gets a
//! [`WorkflowCard`].  The card keeps the original suggestion untouched, an
//! editable [`WorkflowDraft`] and its own [`StagingSequencer`], so staging
//! state never leaks between cards.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flowmate_intent::schedule::{next_run_after, normalize_cron_expr, parse_schedule};
use flowmate_intent::{StagingSequencer, StagingState, Trigger, WorkflowSuggestion};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// The user-editable fields of a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDraft {
    pub trigger: Trigger,
    pub action: String,
    pub frequency: String,
    /// Extra key/value details the user attached to the card.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, String>,
    /// Normalised cron expression, when the user set a custom schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl From<&WorkflowSuggestion> for WorkflowDraft {
    fn from(s: &WorkflowSuggestion) -> Self {
        Self {
            trigger: s.trigger.clone(),
            action: s.action.clone(),
            frequency: s.frequency.clone(),
            custom_fields: BTreeMap::new(),
            schedule: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A button offered on a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAction {
    Activate,
    ViewDashboard,
    EditWorkflow,
}

impl std::fmt::Display for CardAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activate => f.write_str("Activate Workflow"),
            Self::ViewDashboard => f.write_str("View Dashboard"),
            Self::EditWorkflow => f.write_str("Edit Workflow"),
        }
    }
}

// ---------------------------------------------------------------------------
// Card
// ---------------------------------------------------------------------------

/// A suggestion card attached to one assistant message.
pub struct WorkflowCard {
    suggestion: WorkflowSuggestion,
    draft: WorkflowDraft,
    sequencer: Arc<StagingSequencer>,
}

impl WorkflowCard {
    /// Create a card for `suggestion`, staged by `sequencer`.
    ///
    /// The card id is the sequencer's card id, which is the id of the
    /// message the card belongs to.
    pub fn new(suggestion: WorkflowSuggestion, sequencer: StagingSequencer) -> Self {
        let draft = WorkflowDraft::from(&suggestion);
        Self {
            suggestion,
            draft,
            sequencer: Arc::new(sequencer),
        }
    }

    pub fn id(&self) -> Uuid {
        self.sequencer.card_id()
    }

    /// The suggestion as the assistant first proposed it.
    pub fn suggestion(&self) -> &WorkflowSuggestion {
        &self.suggestion
    }

    pub fn draft(&self) -> &WorkflowDraft {
        &self.draft
    }

    /// Tools that must be connected before the card can go live.
    pub fn required_tools(&self) -> &[String] {
        &self.suggestion.required_tools
    }

    pub fn sequencer(&self) -> &StagingSequencer {
        &self.sequencer
    }

    /// A shared handle to the sequencer, usable to cancel a staging run
    /// while the session is busy awaiting it.
    pub fn sequencer_handle(&self) -> Arc<StagingSequencer> {
        Arc::clone(&self.sequencer)
    }

    /// Snapshot of the card's staging state.
    pub fn state(&self) -> StagingState {
        self.sequencer.state()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Whether the draft differs from the original suggestion.
    pub fn is_edited(&self) -> bool {
        self.draft != WorkflowDraft::from(&self.suggestion)
    }

    /// Buttons to show for the card's current state.
    ///
    /// A card that is mid-staging offers nothing; it shows progress instead.
    pub fn available_actions(&self) -> Vec<CardAction> {
        let state = self.state();
        if state.is_active() {
            vec![CardAction::ViewDashboard, CardAction::EditWorkflow]
        } else if state.in_flight().is_some() {
            Vec::new()
        } else {
            vec![CardAction::Activate]
        }
    }

    // -- Editing -------------------------------------------------------------

    pub fn set_trigger(&mut self, trigger: impl Into<Trigger>) {
        self.draft.trigger = trigger.into();
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.draft.action = action.into();
    }

    pub fn set_frequency(&mut self, frequency: impl Into<String>) {
        self.draft.frequency = frequency.into();
    }

    /// Set a custom field, returning the previous value.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.draft.custom_fields.insert(key.into(), value.into())
    }

    pub fn remove_field(&mut self, key: &str) -> Option<String> {
        self.draft.custom_fields.remove(key)
    }

    /// Set a custom cron schedule.
    ///
    /// Five-field expressions are accepted and stored with a leading seconds
    /// field.  The frequency label is replaced with the expression.
    pub fn set_schedule(&mut self, expr: &str) -> Result<()> {
        parse_schedule(expr)?;
        let normalized = normalize_cron_expr(expr);
        self.draft.frequency = format!("Custom ({})", expr.trim());
        self.draft.schedule = Some(normalized);
        Ok(())
    }

    /// Drop the custom schedule and restore the suggested frequency.
    pub fn clear_schedule(&mut self) {
        self.draft.schedule = None;
        self.draft.frequency = self.suggestion.frequency.clone();
    }

    /// Next firing time of the custom schedule after `after`.
    pub fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let expr = self.draft.schedule.as_deref()?;
        let schedule = parse_schedule(expr).ok()?;
        next_run_after(&schedule, after)
    }
}

impl std::fmt::Debug for WorkflowCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCard")
            .field("id", &self.id())
            .field("draft", &self.draft)
            .field("state", &self.state())
            .finish()
    }
}
