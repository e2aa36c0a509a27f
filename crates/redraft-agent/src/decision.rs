//! Structured decision extraction backed by a generator
//!
//! Reviewer feedback is free prose. This asks the model to restate its
//! verdict as a strict JSON object and hands back the raw label; deciding
//! what an unrecognized label means is left to the reviewer.

use crate::capability::{ChatMessage, DecisionExtractor, Generator};
use async_trait::async_trait;
use redraft_core::Result;
use serde::Deserialize;

const EXTRACTION_INSTRUCTIONS: &str = "You classify review feedback. Reply with a single JSON \
object and nothing else: {\"decision\": \"APPROVE\"} if the reviewer approves the content as \
is, or {\"decision\": \"REVISE\"} if the reviewer asks for any change.";

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    decision: String,
}

/// [`DecisionExtractor`] that delegates to a [`Generator`]
pub struct LlmDecisionExtractor<G> {
    generator: G,
}

impl<G: Generator> LlmDecisionExtractor<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl<G: Generator> DecisionExtractor for LlmDecisionExtractor<G> {
    async fn extract_decision(&self, feedback: &str) -> Result<String> {
        let messages = vec![
            ChatMessage::system(EXTRACTION_INSTRUCTIONS),
            ChatMessage::user(format!(
                "Based on the given feedback provided by the reviewer, identify if the \
                 reviewer suggests revision or approves the content as is. \
                 Here is the feedback:\n{}\n\n",
                feedback
            )),
        ];

        let reply = self.generator.generate(&messages).await?;
        Ok(parse_decision_label(&reply))
    }
}

/// Pull the `decision` field out of a JSON reply, tolerating code fences
/// and surrounding prose. Falls back to the trimmed reply.
pub fn parse_decision_label(reply: &str) -> String {
    let json_slice = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return reply.trim().to_string(),
    };

    match serde_json::from_str::<DecisionPayload>(json_slice) {
        Ok(payload) => payload.decision,
        Err(e) => {
            tracing::debug!("Decision reply was not the expected JSON: {}", e);
            reply.trim().to_string()
        }
    }
}
