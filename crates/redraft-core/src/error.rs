//! Unified error types for redraft

use thiserror::Error;

/// Unified error type for all redraft operations
#[derive(Error, Debug)]
pub enum RedraftError {
    // Input errors
    #[error("Original message is empty")]
    EmptyMessage,

    // Collaborator errors
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Decision extraction failed: {0}")]
    DecisionExtraction(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("No checkpoint for conversation: {0}")]
    CheckpointNotFound(String),

    #[error("Checkpoint conflict: {0}")]
    CheckpointConflict(String),

    // Run control
    #[error("Conversation already has a run in flight: {0}")]
    ConversationBusy(String),

    #[error("Run for {conversation_id} cancelled during {node}")]
    Cancelled {
        conversation_id: String,
        node: String,
    },

    #[error("Node {node} timed out after {timeout_ms}ms")]
    Timeout { node: String, timeout_ms: u64 },

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl RedraftError {
    /// Whether retrying the run later (from its checkpoint) may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ApiLimit(_) | Self::Timeout { .. } | Self::Cancelled { .. } | Self::Io(_)
        )
    }
}

/// Result type alias using RedraftError
pub type Result<T> = std::result::Result<T, RedraftError>;
