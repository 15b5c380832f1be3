//! CLI entry point for Flowmate.
//!
//! This binary provides the `flowmate` command: an interactive chat by
//! default, plus one-shot subcommands for classifying a request and
//! inspecting templates and configuration.

mod cli;
mod helpers;
mod render;
mod repl;

use anyhow::{Context, Result};
use clap::Parser;

use flowmate_intent::IntentClassifier;
use flowmate_intent::templates::prefilled_catalog;

use crate::cli::{Cli, Commands};
use crate::helpers::{init_tracing, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, overrides) = load_config(cli.config.as_deref())?;
    init_tracing(&config.log.level);
    if !overrides.is_empty() {
        tracing::debug!(?overrides, "environment overrides applied");
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => repl::cmd_chat(config).await,
        Commands::Templates => {
            render::print_templates(&prefilled_catalog());
            Ok(())
        }
        Commands::Classify { text, json } => cmd_classify(&text.join(" "), json),
        Commands::Config => {
            let rendered =
                serde_json::to_string_pretty(&config).context("failed to render config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: classify
// ---------------------------------------------------------------------------

fn cmd_classify(text: &str, json: bool) -> Result<()> {
    let classifier = IntentClassifier::new().context("failed to build classifier")?;

    let Some(template) = classifier.match_template(text) else {
        if json {
            println!("null");
        } else {
            println!("  No workflow matched. Try naming the apps and when it should run.");
        }
        return Ok(());
    };
    let suggestion = template.suggestion();

    if json {
        let rendered =
            serde_json::to_string_pretty(&suggestion).context("failed to render suggestion")?;
        println!("{rendered}");
    } else {
        println!("  Template:  {}", template.name());
        println!("  Trigger:   {}", suggestion.trigger);
        println!("  Action:    {}", suggestion.action);
        println!("  Frequency: {}", suggestion.frequency);
        println!("  Tools:     {}", suggestion.required_tools.join(", "));
        for prompt in &suggestion.missing_info {
            println!("  Question:  {prompt}");
        }
    }
    Ok(())
}
