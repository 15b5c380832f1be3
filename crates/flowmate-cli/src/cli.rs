//! CLI argument definitions for Flowmate.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Flowmate -- a chat assistant that drafts automation workflows.
#[derive(Parser)]
#[command(
    name = "flowmate",
    version,
    about = "Flowmate -- describe an automation, get a workflow",
    long_about = "A chat-style assistant that turns automation requests into workflow \
                  suggestions and walks them through connect, permissions and test."
)]
pub struct Cli {
    /// Path to a TOML config file (default: config/default.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (the default).
    Chat,

    /// List the quick-start templates.
    Templates,

    /// Classify a request and print the suggestion, without a session.
    Classify {
        /// The request text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Print the suggestion as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration.
    Config,
}
