//! Subcommand: `flowmate chat` -- interactive chat REPL.
//!
//! Plain lines are chat messages.  Lines starting with `/` act on cards:
//! activating, editing, connecting tools and viewing the dashboard.  Ctrl+C
//! pauses a running setup; when nothing is running it exits.

use std::io::{self, Write as _};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use flowmate_chat::{ActivationOutcome, ChatError, ChatSession, FlowmateConfig};
use flowmate_intent::templates::prefilled_catalog;
use flowmate_intent::{IntentError, StagingSequencer};
use flowmate_kernel::{IpcBus, Scheduler};

use crate::render::{
    BannerNotifier, print_card, print_dashboard, print_message, print_templates, progress_line,
};

const HELP: &str = "\
  Type what you want to automate, or use a command:
    /templates                      list quick-start templates
    /use <n>                        start from template n
    /cards                          list workflow cards
    /activate [card]                run setup for a card (default: latest)
    /connect <tool>                 connect a tool
    /set <card> <field> <value>     edit trigger, action, frequency, schedule or any custom field
    /edit [card]                    reopen an active workflow
    /dashboard                      show active workflows
    /help                           show this help
    quit | exit                     leave";

/// The sequencer of the setup currently running, for the Ctrl+C handler.
type RunningSetup = Arc<Mutex<Option<Arc<StagingSequencer>>>>;

/// Run the interactive REPL.
pub async fn cmd_chat(config: FlowmateConfig) -> Result<()> {
    let staging = config.staging_config();
    info!(
        mode = ?staging.connect_mode,
        total_ms = staging.total_delay().as_millis() as u64,
        "starting Flowmate"
    );

    // 1. Kernel: scheduler worker and event bus.
    let scheduler = Scheduler::new();
    let worker = scheduler.start();
    let bus = IpcBus::default();

    // 2. Print staging progress as it happens.
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = progress_line(&event) {
                        println!("    .. {line}");
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "progress printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 3. Session.
    let mut session = ChatSession::new(
        scheduler.clone(),
        bus,
        staging,
        Arc::new(BannerNotifier),
    )
    .context("failed to start chat session")?;

    // 4. Ctrl+C pauses a running setup, otherwise exits.
    let running: RunningSetup = Arc::new(Mutex::new(None));
    {
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                let current = running.lock().ok().and_then(|guard| guard.clone());
                match current {
                    Some(seq) => match seq.cancel() {
                        Ok(true) => eprintln!("\n  Pausing setup..."),
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "failed to cancel setup"),
                    },
                    None => {
                        eprintln!("\n  Interrupted. Goodbye!");
                        std::process::exit(0);
                    }
                }
            }
        });
    }

    // 5. Banner.
    println!();
    println!("  Flowmate v{}", env!("CARGO_PKG_VERSION"));
    println!("  Connect mode: {:?}", session.config().connect_mode);
    println!("  Type /help for commands, or 'quit' to exit.");
    println!();
    if let Some(welcome) = session.messages().first() {
        print_message(welcome, None);
    }
    print_templates(&prefilled_catalog());
    println!();

    // 6. REPL loop.
    let stdin = io::stdin();
    let mut line_buf = String::new();

    loop {
        print!("> ");
        io::stdout().flush().ok();

        line_buf.clear();
        match stdin.read_line(&mut line_buf) {
            Ok(0) => {
                println!();
                info!("EOF received, exiting");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("  Error reading input: {e}");
                continue;
            }
        }

        let trimmed = line_buf.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            info!("user requested exit");
            break;
        }

        let result = match trimmed.strip_prefix('/') {
            Some(command) => run_command(&mut session, &running, command).await,
            None => session.send(trimmed).map(|reply| {
                print_message(&reply, session.card(reply.id).ok());
            }),
        };
        if let Err(e) = result {
            report(&e);
        }
    }

    // 7. Shutdown.
    scheduler.shutdown();
    worker.await.context("scheduler worker panicked")?;
    info!("Flowmate stopped");
    Ok(())
}

async fn run_command(
    session: &mut ChatSession,
    running: &RunningSetup,
    command: &str,
) -> flowmate_chat::Result<()> {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match name {
        "help" => println!("{HELP}"),
        "templates" => print_templates(&prefilled_catalog()),
        "use" => match args.first().and_then(|n| n.parse::<usize>().ok()) {
            Some(n) if n > 0 => {
                let reply = session.use_template(n - 1)?;
                print_message(&reply, session.card(reply.id).ok());
            }
            _ => println!("  Usage: /use <n>"),
        },
        "cards" => {
            let mut any = false;
            for (i, card) in session.cards().enumerate() {
                any = true;
                println!("  Card {}:", i + 1);
                print_card(card);
            }
            if !any {
                println!("  No workflow cards yet.");
            }
        }
        "activate" => {
            let Some(card_id) = resolve_card(session, args.first().copied()) else {
                return Ok(());
            };
            activate(session, running, card_id).await?;
        }
        "connect" => {
            if args.is_empty() {
                println!("  Usage: /connect <tool>");
            } else {
                let tool = args.join(" ");
                if session.tools().is_connected(&tool) {
                    println!("  {tool} is already connected.");
                } else {
                    session.connect_tool(&tool).await?;
                    if let Some(last) = session.messages().last() {
                        print_message(last, None);
                    }
                }
            }
        }
        "set" => edit_field(session, &args)?,
        "edit" => {
            let Some(card_id) = resolve_card(session, args.first().copied()) else {
                return Ok(());
            };
            session.edit_workflow(card_id)?;
            print_card(session.card(card_id)?);
        }
        "dashboard" => print_dashboard(&session.dashboard()),
        other => println!("  Unknown command `/{other}`. Type /help."),
    }
    Ok(())
}

async fn activate(
    session: &mut ChatSession,
    running: &RunningSetup,
    card_id: Uuid,
) -> flowmate_chat::Result<()> {
    let handle = session.card(card_id)?.sequencer_handle();
    set_running(running, Some(handle));
    let before = session.messages().len();
    let outcome = session.activate(card_id).await;
    set_running(running, None);

    match outcome {
        Ok(ActivationOutcome::Activated) => {
            if let Some(last) = session.messages().last() {
                print_message(last, None);
            }
            print_card(session.card(card_id)?);
        }
        Ok(ActivationOutcome::AlreadyActive) => println!("  That workflow is already active."),
        Ok(ActivationOutcome::NeedsTools { .. }) => {
            for message in &session.messages()[before..] {
                print_message(message, None);
            }
        }
        Err(ChatError::Intent(IntentError::StagingCancelled { stage })) => {
            println!("  Setup paused at {stage}. /activate to resume.");
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

fn edit_field(session: &mut ChatSession, args: &[&str]) -> flowmate_chat::Result<()> {
    if args.len() < 3 {
        println!("  Usage: /set <card> <field> <value>");
        return Ok(());
    }
    let Some(card_id) = resolve_card(session, Some(args[0])) else {
        return Ok(());
    };
    let value = args[2..].join(" ");
    let card = session.card_mut(card_id)?;
    match args[1] {
        "trigger" => card.set_trigger(value.as_str()),
        "action" => card.set_action(value),
        "frequency" => card.set_frequency(value),
        "schedule" if value == "none" => card.clear_schedule(),
        "schedule" => {
            card.set_schedule(&value)?;
            if let Some(next) = card.next_run(chrono::Utc::now()) {
                println!("  Next run: {}", next.format("%a %Y-%m-%d %H:%M UTC"));
            }
        }
        key => {
            card.set_field(key, value);
        }
    }
    print_card(card);
    Ok(())
}

/// Map a 1-based card number (or nothing, for the latest card) to an id.
fn resolve_card(session: &ChatSession, arg: Option<&str>) -> Option<Uuid> {
    let id = match arg {
        None => session.latest_card_id(),
        Some(n) => n
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .and_then(|n| session.cards().nth(n - 1))
            .map(|card| card.id()),
    };
    if id.is_none() {
        println!("  No such card. Type /cards to list them.");
    }
    id
}

fn set_running(running: &RunningSetup, seq: Option<Arc<StagingSequencer>>) {
    if let Ok(mut guard) = running.lock() {
        *guard = seq;
    }
}

fn report(e: &ChatError) {
    match e {
        ChatError::Intent(IntentError::ConnectionRejected { tool, .. }) => {
            println!("  Couldn't connect {tool}. Tell me which app to use first.");
        }
        ChatError::Intent(IntentError::InvalidSchedule { reason, .. }) => {
            println!("  That schedule isn't a valid cron expression: {reason}");
        }
        other => println!("  {other}"),
    }
}
