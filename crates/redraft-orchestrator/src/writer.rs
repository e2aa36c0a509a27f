//! Writer role: drafts or revises the response

use redraft_agent::Generator;
use redraft_core::{RedraftError, Result, RevisionState};
use tracing::{debug, info};

use crate::prompt::build_writer_messages;

/// Produces a new draft with exactly one generation call
pub struct Writer<G> {
    generator: G,
    instructions: String,
}

impl<G: Generator> Writer<G> {
    pub fn new(generator: G, instructions: impl Into<String>) -> Self {
        Self {
            generator,
            instructions: instructions.into(),
        }
    }

    /// Write the next draft
    ///
    /// The input state is left untouched; on error nothing is applied.
    pub async fn write(&self, state: &RevisionState) -> Result<RevisionState> {
        if state.original_message().trim().is_empty() {
            return Err(RedraftError::EmptyMessage);
        }

        let revising = state.feedback_for_revision().is_some();
        let messages = build_writer_messages(state, &self.instructions);
        debug!(
            messages = messages.len(),
            revising,
            "Requesting draft {}",
            state.revision_count() + 1
        );

        let draft = self.generator.generate(&messages).await?;

        let mut next = state.clone();
        next.record_draft(draft);
        info!(
            revision = next.revision_count(),
            chars = next.draft().len(),
            "Draft written"
        );
        Ok(next)
    }
}
