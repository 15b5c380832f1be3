//! Activation notifications.
//!
//! When a workflow goes live the session tells the user through a
//! [`Notifier`].  The terminal front end prints a banner; the default
//! [`TracingNotifier`] only logs.

use async_trait::async_trait;
use tracing::info;

/// Receives user-facing notifications from a [`crate::ChatSession`].
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification.  The session awaits this before continuing.
    async fn notify(&self, title: &str, body: &str);
}

/// Notifier that writes to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, title: &str, body: &str) {
        info!(title, body, "notification");
    }
}
