//! Shared helper functions used across CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use flowmate_chat::FlowmateConfig;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with `RUST_LOG` support.
///
/// Falls back to `default_level` when `RUST_LOG` is unset or invalid.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load `.env`, then the config file with `FLOWMATE_*` overrides applied.
///
/// Also returns the names of the overrides, so they can be logged once
/// tracing is up.
pub fn load_config(path: Option<&Path>) -> Result<(FlowmateConfig, Vec<&'static str>)> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let mut config = FlowmateConfig::load_file(path).with_context(|| match path {
        Some(p) => format!("failed to load config from {}", p.display()),
        None => "failed to load config".to_string(),
    })?;
    let overrides = config
        .apply_env_overrides()
        .context("invalid FLOWMATE_* environment override")?;
    Ok((config, overrides))
}
