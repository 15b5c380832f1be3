//! In-process event bus.
//!
//! The bus provides a lightweight publish/subscribe mechanism built on top of
//! [`tokio::sync::broadcast`].  The chat session and the staging sequencer
//! publish [`Event`]s here; renderers subscribe to show progress as it
//! happens.
//!
//! Events are wrapped in [`Arc`] so that broadcasting to multiple subscribers
//! does not require cloning the payload.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use flowmate_kernel::ipc::{IpcBus, Event};
//! # async fn example() {
//! let bus = IpcBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(Event::ToolConnected { tool: "Slack".into() });
//!
//! let event = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An event that flows through the bus.
///
/// Stage and status values are carried as display strings so the kernel does
/// not depend on the crates that define them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A message was appended to a chat session.
    MessageAppended {
        message_id: Uuid,
        /// `"user"` or `"assistant"`.
        author: String,
        timestamp: DateTime<Utc>,
    },

    /// A staging stage on a workflow card changed status.
    StageChanged {
        card_id: Uuid,
        /// Stage name (e.g. `"connect"`).
        stage: String,
        /// New status (e.g. `"loading"`).
        status: String,
        /// Current step pointer, 1-based.
        current_step: u8,
    },

    /// A tool was marked connected.
    ToolConnected { tool: String },

    /// A simulated tool connection was rejected.
    ToolConnectionFailed { tool: String, reason: String },

    /// Every stage on the card completed; the workflow is live.
    WorkflowActivated { card_id: Uuid },

    /// The card's staging state was reset by an edit.
    StagingReset { card_id: Uuid },
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Publish/subscribe event bus backed by [`tokio::sync::broadcast`].
///
/// The bus is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
/// Subscribers receive [`Arc<Event>`] references.
#[derive(Clone)]
pub struct IpcBus {
    inner: Arc<IpcBusInner>,
}

struct IpcBusInner {
    sender: broadcast::Sender<Arc<Event>>,
}

impl IpcBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// If a subscriber falls behind by more than `capacity` events, it will
    /// receive a [`broadcast::error::RecvError::Lagged`] error indicating how
    /// many events were missed.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(IpcBusInner { sender }),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of receivers that will observe this event.  With no
    /// subscribers the event is dropped.
    pub fn publish(&self, event: Event) -> usize {
        match self.inner.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(receivers = n, "event published");
                n
            }
            Err(_) => {
                tracing::trace!("event published but no active receivers");
                0
            }
        }
    }

    /// Create a new subscriber that will receive all future events.
    ///
    /// Events published *before* this call are **not** replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.inner.sender.subscribe()
    }

    /// Return the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for IpcBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = IpcBus::new(16);
        let mut rx = bus.subscribe();

        let receivers = bus.publish(Event::ToolConnected {
            tool: "Slack".into(),
        });
        assert_eq!(receivers, 1);

        let received = rx.recv().await.expect("should receive event");
        match received.as_ref() {
            Event::ToolConnected { tool } => assert_eq!(tool, "Slack"),
            other => panic!("unexpected event variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_share_payload() {
        let bus = IpcBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::WorkflowActivated {
            card_id: Uuid::now_v7(),
        });

        let e1 = rx1.recv().await.expect("rx1");
        let e2 = rx2.recv().await.expect("rx2");
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[test]
    fn publish_with_no_subscribers_is_ok() {
        let bus = IpcBus::new(16);
        let delivered = bus.publish(Event::StagingReset {
            card_id: Uuid::now_v7(),
        });
        assert_eq!(delivered, 0);
    }

    #[test]
    fn subscriber_count() {
        let bus = IpcBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn stage_changed_serializes() {
        let event = Event::StageChanged {
            card_id: Uuid::now_v7(),
            stage: "permissions".into(),
            status: "loading".into(),
            current_step: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"StageChanged\""));
        assert!(json.contains("\"permissions\""));
    }
}
