//! Chat session layer for Flowmate.
//!
//! This crate ties the intent engine to a conversation:
//!
//! - **[`session`]** -- [`ChatSession`] owns the append-only message history,
//!   the workflow cards and the session's tool connections.
//! - **[`card`]** -- [`WorkflowCard`]: an editable draft plus a staging
//!   sequencer per suggestion.
//! - **[`message`]** -- [`ChatMessage`] and its author.
//! - **[`notify`]** -- the [`Notifier`] seam for the activation banner.
//! - **[`config`]** -- TOML + environment configuration.

pub mod card;
pub mod config;
pub mod error;
pub mod message;
pub mod notify;
pub mod session;

pub use card::{CardAction, WorkflowCard, WorkflowDraft};
pub use config::FlowmateConfig;
pub use error::{ChatError, Result};
pub use message::{Author, ChatMessage};
pub use notify::{Notifier, TracingNotifier};
pub use session::{ActivationOutcome, ChatSession, DashboardEntry};
