//! Revision state threaded through the write/review/publish loop
//!
//! The record is mutated only through the role contracts below, which keeps
//! its invariants true by construction:
//! - `revision_count` grows by exactly one per `record_draft` and nowhere else
//! - `decision == Approve` implies the continue flag is false
//! - once the continue flag is false it stays false for the rest of the run

use serde::{Deserialize, Serialize};

use crate::types::{Author, ConversationLog, Decision};
use crate::{RedraftError, Result};

/// Mutable record for one incoming message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionState {
    original_message: String,
    #[serde(default)]
    draft: String,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    decision: Decision,
    #[serde(default)]
    revision_count: u32,
    /// Absent means stop; see `should_continue`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    continue_flag: Option<bool>,
    #[serde(default)]
    log: ConversationLog,
}

impl RevisionState {
    /// Create the state for a new incoming message
    ///
    /// The log starts with the message itself, authored by `human`.
    pub fn new(original_message: impl Into<String>) -> Result<Self> {
        let original_message = original_message.into();
        validate_message(&original_message)?;

        let mut log = ConversationLog::new();
        log.append(Author::Human, original_message.clone());

        Ok(Self {
            original_message,
            draft: String::new(),
            feedback: String::new(),
            decision: Decision::Revise,
            revision_count: 0,
            continue_flag: Some(true),
            log,
        })
    }

    pub fn original_message(&self) -> &str {
        &self.original_message
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn revision_count(&self) -> u32 {
        self.revision_count
    }

    /// Raw continue flag as stored (may be absent in a malformed checkpoint)
    pub fn continue_flag(&self) -> Option<bool> {
        self.continue_flag
    }

    /// Whether the router should send the state back to the writer
    pub fn should_continue(&self) -> bool {
        self.continue_flag.unwrap_or(false)
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Feedback the writer should act on, if this is a revision pass
    ///
    /// Never returned before the first draft exists, even if a feedback
    /// string is somehow present.
    pub fn feedback_for_revision(&self) -> Option<&str> {
        if self.revision_count > 0
            && self.decision == Decision::Revise
            && !self.feedback.trim().is_empty()
        {
            Some(&self.feedback)
        } else {
            None
        }
    }

    /// Writer contract: store the new draft and count the revision
    pub fn record_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
        self.revision_count += 1;
        self.log.append(Author::Writer, self.draft.clone());
    }

    /// Reviewer contract for a normal (uncapped) review
    ///
    /// Returns the resulting continue flag.
    pub fn record_review(
        &mut self,
        feedback: impl Into<String>,
        decision: Decision,
        max_revisions: u32,
    ) -> bool {
        self.feedback = feedback.into();
        self.decision = decision;

        let wants_more = decision == Decision::Revise && self.revision_count < max_revisions;
        let continue_revision = wants_more && self.continue_flag != Some(false);
        self.continue_flag = Some(continue_revision);

        let n = self.revision_count;
        self.log.append(
            Author::Reviewer,
            format!("{} - feedback for writer: {}", n, self.feedback),
        );
        self.log.append(
            Author::Reviewer,
            format!("{} - reviewer decision: {}", n, decision),
        );
        self.log.append(
            Author::Reviewer,
            format!("{} - continue revision?: {}", n, continue_revision),
        );

        continue_revision
    }

    /// Reviewer contract when the revision cap has been hit
    pub fn force_approve(&mut self, cap_message: &str) {
        self.decision = Decision::Approve;
        self.continue_flag = Some(false);

        let n = self.revision_count;
        self.log.append(Author::Reviewer, cap_message);
        self.log.append(
            Author::Reviewer,
            format!("{} - reviewer decision: {}", n, Decision::Approve),
        );
        self.log.append(
            Author::Reviewer,
            format!("{} - continue revision?: {}", n, false),
        );
    }

    /// Start a new run on a conversation whose previous run finished
    ///
    /// The log is carried over; everything else starts fresh.
    pub fn begin_follow_up(&mut self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        validate_message(&message)?;

        self.log.append(Author::Human, message.clone());
        self.original_message = message;
        self.draft.clear();
        self.feedback.clear();
        self.decision = Decision::Revise;
        self.revision_count = 0;
        self.continue_flag = Some(true);
        Ok(())
    }
}

fn validate_message(message: &str) -> Result<()> {
    if message.trim().is_empty() {
        return Err(RedraftError::EmptyMessage);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_defaults() {
        let state = RevisionState::new("Great headphones!").unwrap();
        assert_eq!(state.revision_count(), 0);
        assert_eq!(state.decision(), Decision::Revise);
        assert_eq!(state.continue_flag(), Some(true));
        assert!(state.draft().is_empty());
        assert!(state.feedback().is_empty());
        assert_eq!(state.log().len(), 1);
        assert_eq!(state.log().entries()[0].author, Author::Human);
    }

    #[test]
    fn test_empty_message_rejected() {
        assert!(matches!(
            RevisionState::new(""),
            Err(RedraftError::EmptyMessage)
        ));
        assert!(matches!(
            RevisionState::new("   \n\t"),
            Err(RedraftError::EmptyMessage)
        ));
    }

    #[test]
    fn test_record_draft_increments_by_one() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("first");
        assert_eq!(state.revision_count(), 1);
        state.record_draft("second");
        assert_eq!(state.revision_count(), 2);
        assert_eq!(state.draft(), "second");
        assert_eq!(state.log().entries_by(Author::Writer).count(), 2);
    }

    #[test]
    fn test_feedback_never_used_on_first_pass() {
        let mut state = RevisionState::new("hello").unwrap();
        state.feedback = "stale feedback".to_string();
        assert_eq!(state.feedback_for_revision(), None);

        state.record_draft("draft");
        state.record_review("be warmer", Decision::Revise, 3);
        assert_eq!(state.feedback_for_revision(), Some("be warmer"));
    }

    #[test]
    fn test_review_does_not_touch_revision_count() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("draft");
        state.record_review("fine", Decision::Approve, 3);
        assert_eq!(state.revision_count(), 1);
        state.force_approve("cap");
        assert_eq!(state.revision_count(), 1);
    }

    #[test]
    fn test_approve_implies_stop() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("draft");
        let cont = state.record_review("ship it", Decision::Approve, 3);
        assert!(!cont);
        assert_eq!(state.continue_flag(), Some(false));
    }

    #[test]
    fn test_revise_below_cap_continues() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("draft");
        assert!(state.record_review("shorter", Decision::Revise, 3));
        assert!(state.should_continue());
    }

    #[test]
    fn test_revise_at_cap_stops() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("draft");
        assert!(!state.record_review("shorter", Decision::Revise, 1));
    }

    #[test]
    fn test_stop_is_sticky() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("draft");
        state.force_approve("cap");
        assert!(!state.record_review("again", Decision::Revise, 10));
        assert_eq!(state.continue_flag(), Some(false));
    }

    #[test]
    fn test_review_log_entries() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("draft");
        state.record_review("tone down", Decision::Revise, 3);

        let reviewer: Vec<_> = state
            .log()
            .entries_by(Author::Reviewer)
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(
            reviewer,
            vec![
                "1 - feedback for writer: tone down",
                "1 - reviewer decision: REVISE",
                "1 - continue revision?: true",
            ]
        );
    }

    #[test]
    fn test_force_approve_logs_cap_message() {
        let mut state = RevisionState::new("hello").unwrap();
        state.record_draft("draft");
        state.force_approve("MAX REVISIONS REACHED");
        assert_eq!(state.decision(), Decision::Approve);
        assert!(!state.should_continue());
        assert!(state.log().contains_text("MAX REVISIONS REACHED"));
    }

    #[test]
    fn test_missing_continue_flag_deserializes_as_stop() {
        let json = r#"{"original_message": "hi", "revision_count": 2}"#;
        let state: RevisionState = serde_json::from_str(json).unwrap();
        assert_eq!(state.continue_flag(), None);
        assert!(!state.should_continue());
    }

    #[test]
    fn test_follow_up_resets_counters_and_keeps_log() {
        let mut state = RevisionState::new("first question").unwrap();
        state.record_draft("answer");
        state.record_review("good", Decision::Approve, 3);
        let log_len = state.log().len();

        state.begin_follow_up("second question").unwrap();
        assert_eq!(state.original_message(), "second question");
        assert_eq!(state.revision_count(), 0);
        assert_eq!(state.decision(), Decision::Revise);
        assert_eq!(state.continue_flag(), Some(true));
        assert_eq!(state.log().len(), log_len + 1);
        assert!(state.begin_follow_up(" ").is_err());
    }
}
