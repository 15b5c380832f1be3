//! Integration tests for the flowmate-chat crate.
//!
//! Each test drives a [`ChatSession`] end to end on a running scheduler with
//! short stage delays.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flowmate_chat::{
    ActivationOutcome, Author, CardAction, ChatError, ChatSession, FlowmateConfig, Notifier,
};
use flowmate_intent::{ConnectMode, IntentError, StageStatus, StagingConfig};
use flowmate_kernel::{Event, IpcBus, Scheduler};

/// Notifier that records what it was asked to show.
#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str) {
        self.seen
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

struct Harness {
    session: ChatSession,
    scheduler: Scheduler,
    handle: tokio::task::JoinHandle<()>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(mode: ConnectMode) -> Self {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();
        let notifier = Arc::new(RecordingNotifier::default());
        let config = StagingConfig::default()
            .with_uniform_delay(Duration::from_millis(15))
            .with_connect_mode(mode);
        let session = ChatSession::new(
            scheduler.clone(),
            IpcBus::new(256),
            config,
            notifier.clone(),
        )
        .unwrap();
        Self {
            session,
            scheduler,
            handle,
            notifier,
        }
    }

    async fn finish(self) {
        self.scheduler.shutdown();
        self.handle.await.unwrap();
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Auto connect mode
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn request_to_dashboard() {
    let mut h = Harness::new(ConnectMode::Auto);
    let mut events = h.session.bus().subscribe();

    let reply = h
        .session
        .send("Send me a Slack reminder every morning at 9am")
        .unwrap();
    let card_id = reply.id;
    assert_eq!(
        h.session.card(card_id).unwrap().available_actions(),
        vec![CardAction::Activate]
    );

    let outcome = h.session.activate(card_id).await.unwrap();
    assert_eq!(outcome, ActivationOutcome::Activated);
    assert!(h.session.tools().is_connected("Slack"));

    let card = h.session.card(card_id).unwrap();
    assert_eq!(
        card.available_actions(),
        vec![CardAction::ViewDashboard, CardAction::EditWorkflow]
    );

    let dashboard = h.session.dashboard();
    assert_eq!(dashboard.len(), 1);
    assert_eq!(dashboard[0].card_id, card_id);
    assert_eq!(dashboard[0].action, "Send Slack message");
    assert_eq!(dashboard[0].tools, vec!["Slack"]);

    let seen = h.notifier.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "Workflow activated");

    let last = h.session.messages().last().unwrap();
    assert_eq!(last.author, Author::Assistant);
    assert!(last.text.contains("live"));

    let mut stage_events = 0;
    let mut activated = false;
    while let Ok(event) = events.try_recv() {
        match event.as_ref() {
            Event::StageChanged { card_id: id, .. } if *id == card_id => stage_events += 1,
            Event::WorkflowActivated { card_id: id } => activated = *id == card_id,
            _ => {}
        }
    }
    // Loading and Completed for each of the three stages.
    assert_eq!(stage_events, 6);
    assert!(activated);

    let outcome = h.session.activate(card_id).await.unwrap();
    assert_eq!(outcome, ActivationOutcome::AlreadyActive);

    h.finish().await;
}

#[tokio::test]
async fn edits_survive_reopening() {
    let mut h = Harness::new(ConnectMode::Auto);
    let card_id = h.session.use_template(0).unwrap().id;

    h.session.activate(card_id).await.unwrap();
    h.session.edit_workflow(card_id).unwrap();

    let card = h.session.card_mut(card_id).unwrap();
    assert_eq!(card.state().connect, StageStatus::Pending);
    assert_eq!(card.state().current_step, 1);
    card.set_schedule("0 10 * * Mon-Fri").unwrap();
    card.set_field("channel", "#standup");

    assert!(h.session.dashboard().is_empty());

    // Tools stay connected, so the second run goes straight through.
    h.session.activate(card_id).await.unwrap();
    let dashboard = h.session.dashboard();
    assert_eq!(dashboard[0].frequency, "Custom (0 10 * * Mon-Fri)");

    let original = h.session.card(card_id).unwrap().suggestion().clone();
    assert_eq!(original.frequency, "Weekdays at 9:30 AM");
    let message = h
        .session
        .messages()
        .iter()
        .find(|m| m.id == card_id)
        .unwrap();
    assert_eq!(message.suggestion.as_ref(), Some(&original));

    h.finish().await;
}

#[tokio::test]
async fn conditional_card_reports_rejection() {
    let mut h = Harness::new(ConnectMode::Auto);
    let card_id = h.session.send("when a file is uploaded, tell the team").unwrap().id;
    let before = h.session.messages().len();

    let err = h.session.activate(card_id).await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::Intent(IntentError::ConnectionRejected { .. })
    ));
    assert_eq!(h.session.card(card_id).unwrap().state().connect, StageStatus::Pending);
    assert_eq!(h.session.messages().len(), before);
    assert!(h.notifier.seen.lock().unwrap().is_empty());

    h.finish().await;
}

#[tokio::test]
async fn cancelled_activation_can_resume() {
    let scheduler = Scheduler::new();
    let handle = scheduler.start();
    let config = StagingConfig {
        connect_delay: Duration::from_millis(300),
        ..StagingConfig::default().with_uniform_delay(Duration::from_millis(10))
    };
    let mut session = ChatSession::new(
        scheduler.clone(),
        IpcBus::new(64),
        config,
        Arc::new(flowmate_chat::TracingNotifier),
    )
    .unwrap();
    let card_id = session.send("remind me to call mom").unwrap().id;
    let seq = session.card(card_id).unwrap().sequencer_handle();

    let canceller = tokio::spawn(async move {
        seq.subscribe()
            .wait_for(|s| s.connect == StageStatus::Loading)
            .await
            .unwrap();
        // Tool connections come first; wait until the stage timer itself runs.
        tokio::time::sleep(Duration::from_millis(100)).await;
        seq.cancel().unwrap()
    });

    let err = session.activate(card_id).await.unwrap_err();
    assert!(canceller.await.unwrap());
    assert!(matches!(
        err,
        ChatError::Intent(IntentError::StagingCancelled { .. })
    ));
    assert!(session.tools().all_connected(session.card(card_id).unwrap().required_tools()));
    assert_eq!(session.card(card_id).unwrap().state().connect, StageStatus::Pending);

    let outcome = session.activate(card_id).await.unwrap();
    assert_eq!(outcome, ActivationOutcome::Activated);

    scheduler.shutdown();
    handle.await.unwrap();
}

// ═══════════════════════════════════════════════════════════════════════
//  Manual connect mode
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn manual_mode_asks_for_each_tool() {
    let mut h = Harness::new(ConnectMode::Manual);
    let card_id = h.session.send("email me on whatsapp").unwrap().id;
    let before = h.session.messages().len();

    let outcome = h.session.activate(card_id).await.unwrap();
    assert_eq!(
        outcome,
        ActivationOutcome::NeedsTools {
            missing: vec!["Gmail".into(), "WhatsApp".into()]
        }
    );
    let prompts = &h.session.messages()[before..];
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].text.contains("Gmail"));
    assert!(prompts[1].text.contains("WhatsApp"));
    assert_eq!(h.session.card(card_id).unwrap().state().connect, StageStatus::Pending);

    h.session.connect_tool("Gmail").await.unwrap();
    h.session.connect_tool("WhatsApp").await.unwrap();
    let after_connect = h.session.messages().len();
    assert_eq!(
        h.session.messages().last().unwrap().text,
        "WhatsApp is connected."
    );
    // Idempotent, and says nothing the second time.
    h.session.connect_tool("WhatsApp").await.unwrap();
    assert_eq!(h.session.messages().len(), after_connect);
    assert_eq!(h.session.tools().connected_tools(), vec!["Gmail", "WhatsApp"]);

    let outcome = h.session.activate(card_id).await.unwrap();
    assert_eq!(outcome, ActivationOutcome::Activated);

    h.finish().await;
}

#[tokio::test]
async fn connected_tools_are_shared_across_cards() {
    let mut h = Harness::new(ConnectMode::Manual);
    h.session.connect_tool("Slack").await.unwrap();

    let first = h.session.send("daily slack summary").unwrap().id;
    let second = h.session.use_template(0).unwrap().id;

    assert_eq!(
        h.session.activate(first).await.unwrap(),
        ActivationOutcome::Activated
    );
    assert_eq!(
        h.session.card(second).unwrap().state().connect,
        StageStatus::Pending
    );
    assert_eq!(
        h.session.activate(second).await.unwrap(),
        ActivationOutcome::Activated
    );
    assert_eq!(h.session.dashboard().len(), 2);

    h.finish().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Configuration
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn config_file_drives_staging() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[staging]\nconnect_delay_ms = 5\npermissions_delay_ms = 6\ntest_delay_ms = 7\n\
         tool_connect_delay_ms = 8\nconnect_mode = \"manual\"\n\n[log]\nlevel = \"warn\""
    )
    .unwrap();

    let config = FlowmateConfig::from_file(file.path()).unwrap();
    let staging = config.staging_config();
    assert_eq!(staging.connect_delay, Duration::from_millis(5));
    assert_eq!(staging.total_delay(), Duration::from_millis(18));
    assert_eq!(staging.tool_connect_delay, Duration::from_millis(8));
    assert_eq!(staging.connect_mode, ConnectMode::Manual);
    assert_eq!(config.log.level, "warn");
}
