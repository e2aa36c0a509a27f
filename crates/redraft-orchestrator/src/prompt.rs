//! Prompt builders for the writer and reviewer roles
//!
//! Both roles see the role instructions, then the whole conversation log as
//! prior context, then a closing request specific to the role.

use redraft_agent::ChatMessage;
use redraft_core::{Author, ConversationLog, RevisionState};

/// Map the conversation log onto chat messages
///
/// Writer entries are the model's own earlier turns; reviewer entries are
/// presented as tagged user turns.
pub fn log_to_messages(log: &ConversationLog) -> Vec<ChatMessage> {
    log.iter()
        .map(|entry| match entry.author {
            Author::Human => ChatMessage::user(entry.content.clone()),
            Author::Writer => ChatMessage::assistant(entry.content.clone()),
            Author::Reviewer => ChatMessage::user(format!("[reviewer] {}", entry.content)),
        })
        .collect()
}

/// Build the writer request
///
/// Feedback is appended as a revision directive only on revision passes.
pub fn build_writer_messages(state: &RevisionState, instructions: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(instructions)];
    messages.extend(log_to_messages(state.log()));

    messages.push(ChatMessage::user(format!(
        "Original Customer Message:\n{}",
        state.original_message()
    )));

    if let Some(feedback) = state.feedback_for_revision() {
        messages.push(ChatMessage::user(format!(
            "Reviewer Feedback:\n{}\n\nPlease revise your response based on this feedback.",
            feedback
        )));
    }

    messages
}

/// Build the reviewer request for the current draft
pub fn build_reviewer_messages(state: &RevisionState, instructions: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(instructions)];
    messages.extend(log_to_messages(state.log()));

    messages.push(ChatMessage::user(format!(
        "Original Customer Message:\n{}\n\nProposed Response:\n{}",
        state.original_message(),
        state.draft()
    )));

    messages
}
