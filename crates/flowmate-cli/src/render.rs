//! Terminal rendering of messages, cards and staging progress.

use async_trait::async_trait;

use flowmate_chat::{Author, ChatMessage, DashboardEntry, Notifier, WorkflowCard};
use flowmate_intent::{Stage, StageStatus, StagingState};
use flowmate_intent::templates::PrefilledTemplate;
use flowmate_kernel::Event;

/// Print a chat message, with its card when it carries one.
pub fn print_message(message: &ChatMessage, card: Option<&WorkflowCard>) {
    let who = match message.author {
        Author::User => "you",
        Author::Assistant => "flowmate",
    };
    println!("  {who}: {}", message.text);
    if let Some(card) = card {
        print_card(card);
    }
}

/// Print a suggestion card.
pub fn print_card(card: &WorkflowCard) {
    let draft = card.draft();
    let suggestion = card.suggestion();
    let short_id = short_id(card.id());

    println!();
    println!("  +-- Workflow [{short_id}]{}", if suggestion.is_prefilled { " (template)" } else { "" });
    println!("  |  Trigger:   {}", draft.trigger);
    println!("  |  Action:    {}", draft.action);
    println!("  |  Frequency: {}", draft.frequency);
    for (key, value) in &draft.custom_fields {
        println!("  |  {key}: {value}");
    }
    println!("  |  Tools:     {}", card.required_tools().join(", "));
    if !suggestion.missing_info.is_empty() {
        println!("  |  Still need to know:");
        for prompt in &suggestion.missing_info {
            println!("  |    - {prompt}");
        }
    }
    print_stages(&card.state());
    let actions: Vec<String> = card
        .available_actions()
        .iter()
        .map(|a| format!("[{a}]"))
        .collect();
    if !actions.is_empty() {
        println!("  |  {}", actions.join(" "));
    }
    println!("  +--");
    println!();
}

fn print_stages(state: &StagingState) {
    let line: Vec<String> = Stage::ALL
        .iter()
        .map(|stage| format!("{} {}", status_mark(state.status(*stage)), stage))
        .collect();
    println!("  |  Setup:     {}", line.join("  "));
}

fn status_mark(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "[ ]",
        StageStatus::Loading => "[~]",
        StageStatus::Completed => "[x]",
    }
}

/// Print the quick-start catalog, numbered from 1.
pub fn print_templates(catalog: &[PrefilledTemplate]) {
    println!("  Templates:");
    for (i, template) in catalog.iter().enumerate() {
        let s = &template.suggestion;
        println!(
            "    {}. {} ({}, {})",
            i + 1,
            template.title,
            s.frequency,
            s.required_tools.join(" + ")
        );
    }
}

/// Print active workflows.
pub fn print_dashboard(entries: &[DashboardEntry]) {
    if entries.is_empty() {
        println!("  No active workflows yet.");
        return;
    }
    println!("  Active workflows:");
    for entry in entries {
        println!(
            "    [{}] {} | {} | {} | {}",
            short_id(entry.card_id),
            entry.trigger,
            entry.action,
            entry.frequency,
            entry.tools.join(", ")
        );
    }
}

/// One progress line for a bus event, if the event is worth showing.
pub fn progress_line(event: &Event) -> Option<String> {
    match event {
        Event::StageChanged { stage, status, .. } => match status.as_str() {
            "loading" => Some(format!("{stage}...")),
            "completed" => Some(format!("{stage} done")),
            _ => Some(format!("{stage} back to pending")),
        },
        Event::ToolConnected { tool } => Some(format!("{tool} connected")),
        Event::ToolConnectionFailed { tool, reason } => {
            Some(format!("could not connect {tool}: {reason}"))
        }
        Event::StagingReset { .. } => Some("setup reset".to_string()),
        Event::MessageAppended { .. } | Event::WorkflowActivated { .. } => None,
    }
}

pub fn short_id(id: uuid::Uuid) -> String {
    let s = id.simple().to_string();
    s[s.len() - 6..].to_string()
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Prints a banner when a workflow goes live.
pub struct BannerNotifier;

#[async_trait]
impl Notifier for BannerNotifier {
    async fn notify(&self, title: &str, body: &str) {
        let width = title.len().max(body.len()) + 4;
        let rule = "=".repeat(width);
        println!();
        println!("  {rule}");
        println!("    {title}");
        println!("    {body}");
        println!("  {rule}");
        println!();
    }
}
