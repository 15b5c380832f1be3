//! Tool connection state and the simulated connector.
//!
//! [`ToolConnections`] is a plain value owned by the chat session and handed
//! by `&mut` to whatever needs to change it; there is no global map.
//! [`ToolConnector`] models connecting a tool as a delayed scheduler task
//! followed by flipping the tool's flag.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use flowmate_kernel::{Event, IpcBus, Scheduler, TaskId, TaskStatus};

use crate::error::{IntentError, Result};
use crate::suggestion::UNRESOLVED_TOOL;

// ---------------------------------------------------------------------------
// ToolConnections
// ---------------------------------------------------------------------------

/// Session-lifetime map from tool name to its connected flag.
///
/// Tools are only ever added or flipped to connected; nothing disconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConnections {
    connected: BTreeMap<String, bool>,
}

impl ToolConnections {
    /// Create an empty map where every tool reads as disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tool` has been connected.
    pub fn is_connected(&self, tool: &str) -> bool {
        self.connected.get(tool).copied().unwrap_or(false)
    }

    /// Mark `tool` connected.  Returns `false` if it already was.
    pub fn mark_connected(&mut self, tool: impl Into<String>) -> bool {
        let previous = self.connected.insert(tool.into(), true);
        previous != Some(true)
    }

    /// The subset of `required` that is not connected, in the given order.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .map(String::as_str)
            .filter(|tool| !self.is_connected(tool))
            .collect()
    }

    /// Whether every tool in `required` is connected.
    pub fn all_connected(&self, required: &[String]) -> bool {
        required.iter().all(|tool| self.is_connected(tool))
    }

    /// Names of all connected tools, sorted.
    pub fn connected_tools(&self) -> Vec<&str> {
        self.connected
            .iter()
            .filter(|(_, connected)| **connected)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ToolConnector
// ---------------------------------------------------------------------------

/// Simulates connecting external tools.
///
/// Each connection is a delayed task on the shared [`Scheduler`]; once it
/// completes the tool is marked connected in the caller's
/// [`ToolConnections`].
#[derive(Clone)]
pub struct ToolConnector {
    scheduler: Scheduler,
    bus: IpcBus,
    delay: Duration,
}

impl ToolConnector {
    /// Create a connector that waits `delay` per tool.
    pub fn new(scheduler: Scheduler, bus: IpcBus, delay: Duration) -> Self {
        Self {
            scheduler,
            bus,
            delay,
        }
    }

    /// Validate `tool` and schedule its connection.
    ///
    /// Returns `Ok(None)` when the tool is already connected, so callers can
    /// skip straight past it.
    pub fn submit(&self, tools: &ToolConnections, tool: &str) -> Result<Option<TaskId>> {
        if tools.is_connected(tool) {
            debug!(tool, "tool already connected");
            return Ok(None);
        }

        if let Some(reason) = rejection_reason(tool) {
            warn!(tool, reason, "tool connection rejected");
            self.bus.publish(Event::ToolConnectionFailed {
                tool: tool.to_string(),
                reason: reason.to_string(),
            });
            return Err(IntentError::ConnectionRejected {
                tool: tool.to_string(),
                reason: reason.to_string(),
            });
        }

        let task_id = self.scheduler.submit_delayed(
            format!("connect:{tool}"),
            self.delay,
            Box::new(|| Box::pin(async { Ok(()) })),
        )?;
        debug!(tool, task_id = %task_id, "tool connection scheduled");
        Ok(Some(task_id))
    }

    /// Wait for a scheduled connection and record the result.
    pub async fn complete(
        &self,
        tools: &mut ToolConnections,
        tool: &str,
        task_id: TaskId,
    ) -> Result<()> {
        match self.scheduler.wait(task_id).await? {
            TaskStatus::Completed => {
                tools.mark_connected(tool);
                info!(tool, "tool connected");
                self.bus.publish(Event::ToolConnected {
                    tool: tool.to_string(),
                });
                Ok(())
            }
            TaskStatus::Cancelled => {
                debug!(tool, "tool connection cancelled");
                Err(IntentError::ConnectionCancelled {
                    tool: tool.to_string(),
                })
            }
            other => Err(IntentError::Internal(format!(
                "connection task for `{tool}` ended as {other:?}"
            ))),
        }
    }

    /// Connect `tool`, waiting out the simulated delay.
    ///
    /// Connecting an already-connected tool resolves immediately and leaves
    /// the state unchanged.
    pub async fn connect(&self, tools: &mut ToolConnections, tool: &str) -> Result<()> {
        match self.submit(tools, tool)? {
            Some(task_id) => self.complete(tools, tool, task_id).await,
            None => Ok(()),
        }
    }
}

/// Why a tool name cannot be connected, if it cannot.
fn rejection_reason(tool: &str) -> Option<&'static str> {
    if tool.trim().is_empty() {
        Some("tool name is empty")
    } else if tool == UNRESOLVED_TOOL {
        Some("no service has been chosen yet")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
