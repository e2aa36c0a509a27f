//! Capability traits consumed by the revision loop
//!
//! The loop only ever talks to a language model through these two seams,
//! which lets tests substitute scripted implementations.

use async_trait::async_trait;
use redraft_core::Result;
use serde::{Deserialize, Serialize};

/// Speaker of a chat message sent to the generation capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in a generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Free-text generation
///
/// Errors are returned as-is; callers in the loop never retry.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Maps reviewer feedback prose onto a raw decision label
///
/// The returned label is unvalidated; the reviewer classifies it and falls
/// back to REVISE when it is not exactly APPROVE or REVISE.
#[async_trait]
pub trait DecisionExtractor: Send + Sync {
    async fn extract_decision(&self, feedback: &str) -> Result<String>;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for std::sync::Arc<T> {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        (**self).generate(messages).await
    }
}

#[async_trait]
impl<T: DecisionExtractor + ?Sized> DecisionExtractor for std::sync::Arc<T> {
    async fn extract_decision(&self, feedback: &str) -> Result<String> {
        (**self).extract_decision(feedback).await
    }
}
