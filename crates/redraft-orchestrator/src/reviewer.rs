//! Reviewer role: critiques the draft and decides whether to loop

use redraft_agent::{DecisionExtractor, Generator};
use redraft_core::{Classification, Decision, LoopSettings, Result, RevisionState};
use tracing::{info, warn};

use crate::prompt::build_reviewer_messages;

/// Judges drafts, subject to the configured revision cap
pub struct Reviewer<G, D> {
    generator: G,
    extractor: D,
    instructions: String,
    settings: LoopSettings,
}

impl<G: Generator, D: DecisionExtractor> Reviewer<G, D> {
    pub fn new(
        generator: G,
        extractor: D,
        instructions: impl Into<String>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            generator,
            extractor,
            instructions: instructions.into(),
            settings,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Review the current draft
    ///
    /// Once `revision_count >= max_revisions` the draft is approved without
    /// calling either capability. Otherwise feedback is generated, then
    /// classified; an unrecognized label counts as REVISE.
    pub async fn review(&self, state: &RevisionState) -> Result<RevisionState> {
        let mut next = state.clone();

        if state.revision_count() >= self.settings.max_revisions {
            info!(
                revision = state.revision_count(),
                max = self.settings.max_revisions,
                "Revision cap reached, approving current draft"
            );
            next.force_approve(&self.settings.max_revisions_message);
            return Ok(next);
        }

        let messages = build_reviewer_messages(state, &self.instructions);
        let feedback = self.generator.generate(&messages).await?;

        let raw = self.extractor.extract_decision(&feedback).await?;
        let Classification {
            decision,
            recognized,
        } = Decision::classify(&raw);
        if !recognized {
            warn!(raw = %raw, "Ambiguous reviewer decision, defaulting to REVISE");
        }

        let continue_revision =
            next.record_review(feedback, decision, self.settings.max_revisions);
        info!(
            revision = next.revision_count(),
            %decision,
            continue_revision,
            "Review complete"
        );
        Ok(next)
    }
}
