//! The chat session.
//!
//! A [`ChatSession`] is the in-memory state of one conversation: the
//! append-only message list, one [`WorkflowCard`] per suggestion, and the
//! session's [`ToolConnections`].  Nothing outlives the session.
//!
//! Methods that touch staging are `async` and take `&mut self`; callers that
//! need to cancel a running stage grab a
//! [`sequencer handle`](WorkflowCard::sequencer_handle) first.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowmate_intent::templates::prefilled_catalog;
use flowmate_intent::{
    ConnectMode, IntentClassifier, StagingConfig, StagingSequencer, ToolConnections,
    ToolConnector, UNRESOLVED_TOOL, WorkflowSuggestion,
};
use flowmate_kernel::{Event, IpcBus, Scheduler};

use crate::card::WorkflowCard;
use crate::error::{ChatError, Result};
use crate::message::ChatMessage;
use crate::notify::Notifier;

const WELCOME: &str = "Hi! Tell me what you'd like to automate, \
     or pick one of the templates to get started.";

const SUGGESTION_REPLY: &str = "I can help you automate that! \
     Here's a workflow I've put together:";

const TEMPLATE_REPLY: &str = "Great choice! Here's the workflow, ready to configure:";

const CLARIFICATION: &str = "I'd love to help you automate that. Could you be more specific? \
     Tell me which apps you use and when the workflow should run, for example \
     \"Send me a Slack message every morning at 9am\".";

/// Result of [`ChatSession::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Every stage completed; the workflow is live.
    Activated,
    /// The card was already active; nothing ran.
    AlreadyActive,
    /// Manual connect mode and these tools still need connecting.
    NeedsTools { missing: Vec<String> },
}

/// One row of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardEntry {
    pub card_id: Uuid,
    pub trigger: String,
    pub action: String,
    pub frequency: String,
    pub tools: Vec<String>,
}

/// In-memory state of one conversation.
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    /// Keyed by message id; v7 ids keep this in message order.
    cards: BTreeMap<Uuid, WorkflowCard>,
    tools: ToolConnections,
    classifier: IntentClassifier,
    connector: ToolConnector,
    scheduler: Scheduler,
    bus: IpcBus,
    config: StagingConfig,
    notifier: Arc<dyn Notifier>,
}

impl ChatSession {
    /// Create a session and post the welcome message.
    ///
    /// The scheduler must already be started; staging tasks are queued on it.
    pub fn new(
        scheduler: Scheduler,
        bus: IpcBus,
        config: StagingConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let classifier = IntentClassifier::new()?;
        let connector = ToolConnector::new(scheduler.clone(), bus.clone(), config.tool_connect_delay);
        let mut session = Self {
            messages: Vec::new(),
            cards: BTreeMap::new(),
            tools: ToolConnections::new(),
            classifier,
            connector,
            scheduler,
            bus,
            config,
            notifier,
        };
        session.push(ChatMessage::assistant(WELCOME));
        info!(mode = ?session.config.connect_mode, "chat session started");
        Ok(session)
    }

    // -- Accessors -----------------------------------------------------------

    /// Every message, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn tools(&self) -> &ToolConnections {
        &self.tools
    }

    pub fn bus(&self) -> &IpcBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn card(&self, card_id: Uuid) -> Result<&WorkflowCard> {
        self.cards
            .get(&card_id)
            .ok_or(ChatError::UnknownCard { card_id })
    }

    pub fn card_mut(&mut self, card_id: Uuid) -> Result<&mut WorkflowCard> {
        self.cards
            .get_mut(&card_id)
            .ok_or(ChatError::UnknownCard { card_id })
    }

    /// Cards in message order.
    pub fn cards(&self) -> impl Iterator<Item = &WorkflowCard> {
        self.cards.values()
    }

    /// The most recently created card, if any.
    pub fn latest_card_id(&self) -> Option<Uuid> {
        self.cards.keys().next_back().copied()
    }

    // -- Conversation --------------------------------------------------------

    /// Post a user message and the assistant's reply.
    ///
    /// Returns the reply.  When the text matches a template the reply
    /// carries a suggestion card; otherwise it asks for more detail.
    pub fn send(&mut self, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.push(ChatMessage::user(text));

        let reply = match self.classifier.classify(text) {
            Some(suggestion) => self.post_suggestion(SUGGESTION_REPLY, suggestion),
            None => {
                debug!("no template matched, asking for details");
                self.push(ChatMessage::assistant(CLARIFICATION))
            }
        };
        Ok(reply)
    }

    /// Pick a template from the prefilled catalog by zero-based index.
    pub fn use_template(&mut self, index: usize) -> Result<ChatMessage> {
        let mut catalog = prefilled_catalog();
        let available = catalog.len();
        if index >= available {
            return Err(ChatError::UnknownTemplate { index, available });
        }
        let template = catalog.swap_remove(index);
        info!(title = %template.title, "prefilled template selected");

        self.push(ChatMessage::user(template.title));
        Ok(self.post_suggestion(TEMPLATE_REPLY, template.suggestion))
    }

    // -- Workflow lifecycle --------------------------------------------------

    /// Run the card's staging sequence.
    ///
    /// In [`ConnectMode::Manual`] a card with unconnected tools does not
    /// stage; instead one assistant message per missing tool is posted and
    /// [`ActivationOutcome::NeedsTools`] is returned.  Failures (a rejected
    /// connection, a cancelled stage) are logged and returned; the card keeps
    /// whatever progress it made and can be activated again.
    pub async fn activate(&mut self, card_id: Uuid) -> Result<ActivationOutcome> {
        let card = self.card(card_id)?;
        if card.is_active() {
            return Ok(ActivationOutcome::AlreadyActive);
        }

        if self.config.connect_mode == ConnectMode::Manual {
            let missing: Vec<String> = self
                .tools
                .missing(card.required_tools())
                .into_iter()
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                for tool in &missing {
                    self.push(ChatMessage::assistant(connect_prompt(tool)));
                }
                info!(card_id = %card_id, missing = ?missing, "activation waiting on tools");
                return Ok(ActivationOutcome::NeedsTools { missing });
            }
        }

        let card = self
            .cards
            .get(&card_id)
            .ok_or(ChatError::UnknownCard { card_id })?;
        if let Err(e) = card
            .sequencer()
            .run(card.required_tools(), &mut self.tools)
            .await
        {
            warn!(card_id = %card_id, error = %e, "activation failed");
            return Err(e.into());
        }

        let draft = card.draft();
        let body = format!("\"{}\" runs {}.", draft.action, draft.frequency.to_lowercase());
        self.notifier.notify("Workflow activated", &body).await;
        self.push(ChatMessage::assistant(format!(
            "Your workflow is live! {body} You can find it on the dashboard."
        )));
        Ok(ActivationOutcome::Activated)
    }

    /// Connect one tool for this session.
    ///
    /// Connecting an already-connected tool is a no-op.
    pub async fn connect_tool(&mut self, tool: &str) -> Result<()> {
        let tool = tool.trim();
        if self.tools.is_connected(tool) {
            debug!(tool, "tool already connected");
            return Ok(());
        }
        self.connector.connect(&mut self.tools, tool).await?;
        self.push(ChatMessage::assistant(format!("{tool} is connected.")));
        Ok(())
    }

    /// Put an active (or partially staged) card back into edit mode.
    ///
    /// Staging returns to step 1; draft edits are kept.
    pub fn edit_workflow(&mut self, card_id: Uuid) -> Result<()> {
        let card = self.card(card_id)?;
        card.sequencer().reset();
        info!(card_id = %card_id, "workflow reopened for editing");
        Ok(())
    }

    /// Every active workflow, in message order.
    pub fn dashboard(&self) -> Vec<DashboardEntry> {
        self.cards
            .values()
            .filter(|card| card.is_active())
            .map(|card| {
                let draft = card.draft();
                DashboardEntry {
                    card_id: card.id(),
                    trigger: draft.trigger.to_string(),
                    action: draft.action.clone(),
                    frequency: draft.frequency.clone(),
                    tools: card.required_tools().to_vec(),
                }
            })
            .collect()
    }

    // -- Internals -----------------------------------------------------------

    fn post_suggestion(&mut self, text: &str, suggestion: WorkflowSuggestion) -> ChatMessage {
        let message = ChatMessage::assistant_with_suggestion(text, suggestion.clone());
        let sequencer = StagingSequencer::new(
            message.id,
            self.scheduler.clone(),
            self.bus.clone(),
            self.config.clone(),
        );
        self.cards
            .insert(message.id, WorkflowCard::new(suggestion, sequencer));
        self.push(message)
    }

    fn push(&mut self, message: ChatMessage) -> ChatMessage {
        self.bus.publish(Event::MessageAppended {
            message_id: message.id,
            author: message.author.to_string(),
            timestamp: message.created_at,
        });
        self.messages.push(message.clone());
        message
    }
}

fn connect_prompt(tool: &str) -> String {
    if tool == UNRESOLVED_TOOL {
        "I still need to know which app or service this workflow should use \
         before it can be activated."
            .to_string()
    } else {
        format!("To continue, connect {tool}. Type `/connect {tool}` when you're ready.")
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("messages", &self.messages.len())
            .field("cards", &self.cards.len())
            .field("tools", &self.tools)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Author;
    use crate::notify::TracingNotifier;
    use std::time::Duration;

    fn session() -> ChatSession {
        ChatSession::new(
            Scheduler::new(),
            IpcBus::new(64),
            StagingConfig::default().with_uniform_delay(Duration::from_millis(10)),
            Arc::new(TracingNotifier),
        )
        .unwrap()
    }

    #[test]
    fn starts_with_welcome() {
        let s = session();
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.messages()[0].author, Author::Assistant);
        assert!(s.latest_card_id().is_none());
    }

    #[test]
    fn matched_text_gets_a_card() {
        let mut s = session();
        let reply = s.send("forward my email to whatsapp").unwrap();

        let suggestion = reply.suggestion.as_ref().unwrap();
        assert_eq!(suggestion.action, "Send WhatsApp notification");
        assert_eq!(s.latest_card_id(), Some(reply.id));
        assert_eq!(s.card(reply.id).unwrap().required_tools(), ["Gmail", "WhatsApp"]);
        assert_eq!(s.messages().len(), 3);
    }

    #[test]
    fn unmatched_text_asks_for_detail() {
        let mut s = session();
        let reply = s.send("hello").unwrap();
        assert!(reply.suggestion.is_none());
        assert_eq!(reply.text, CLARIFICATION);
        assert!(s.latest_card_id().is_none());
    }

    #[test]
    fn empty_text_is_rejected() {
        let mut s = session();
        assert!(matches!(s.send("   "), Err(ChatError::EmptyMessage)));
        assert_eq!(s.messages().len(), 1);
    }

    #[test]
    fn templates_are_prefilled() {
        let mut s = session();
        let reply = s.use_template(0).unwrap();
        assert!(reply.suggestion.unwrap().is_prefilled);

        let err = s.use_template(99).unwrap_err();
        assert!(matches!(err, ChatError::UnknownTemplate { index: 99, .. }));
    }

    #[test]
    fn unknown_card_is_an_error() {
        let s = session();
        let id = Uuid::now_v7();
        assert!(matches!(s.card(id), Err(ChatError::UnknownCard { card_id }) if card_id == id));
    }

    #[test]
    fn connect_prompt_names_the_tool() {
        assert!(connect_prompt("Slack").contains("/connect Slack"));
        assert!(!connect_prompt(UNRESOLVED_TOOL).contains("/connect"));
    }
}
