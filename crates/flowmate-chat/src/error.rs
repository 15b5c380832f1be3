//! Chat layer error types.

use std::path::PathBuf;

use uuid::Uuid;

/// Unified error type for the chat crate.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The message text was empty after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// No card is attached to the given message.
    #[error("no workflow card for message {card_id}")]
    UnknownCard { card_id: Uuid },

    /// The prefilled template index is out of range.
    #[error("no template #{index} (catalog has {available})")]
    UnknownTemplate { index: usize, available: usize },

    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::FlowmateConfig`].
    #[error("failed to parse config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An environment override has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidOverride { key: String, reason: String },

    /// An error propagated from the intent crate.
    #[error(transparent)]
    Intent(#[from] flowmate_intent::IntentError),

    /// An error propagated from the kernel crate.
    #[error(transparent)]
    Kernel(#[from] flowmate_kernel::KernelError),
}

/// Convenience alias used throughout the chat crate.
pub type Result<T> = std::result::Result<T, ChatError>;
