//! Transcript logger - human-readable run log at `<dir>/<conversation>.md`
//!
//! Every write is fail-open: a broken transcript never fails a run.

use std::path::{Path, PathBuf};

use chrono::Utc;
use redraft_core::fail_open::fail_open;
use redraft_core::RevisionState;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::state_machine::Node;

/// Maximum characters of a draft or feedback shown per entry
const PREVIEW_CHARS: usize = 500;

/// Appends one markdown section per completed node
#[derive(Debug, Clone)]
pub struct TranscriptLogger {
    dir: PathBuf,
}

impl TranscriptLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", conversation_id))
    }

    pub async fn log_run_start(&self, conversation_id: &str, state: &RevisionState, next: Node) {
        let path = self.path_for(conversation_id);
        fail_open("transcript::log_run_start", || async {
            let content = format!(
                "# Conversation {}\n\n**Started**: {}\n**Entering at**: {}\n\n> {}\n\n---\n\n",
                conversation_id,
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                next,
                quote(state.original_message()),
            );
            append(&path, &content).await
        })
        .await;
    }

    /// Record a completed node
    ///
    /// `cap_message` is set when a review was forced by the revision cap; the
    /// state then still carries the previous review's feedback.
    pub async fn log_node(
        &self,
        conversation_id: &str,
        node: Node,
        state: &RevisionState,
        cap_message: Option<&str>,
    ) {
        let path = self.path_for(conversation_id);
        fail_open("transcript::log_node", || async {
            let content = match (node, cap_message) {
                (Node::Writer, _) => format!(
                    "### Draft {}\n\n> {}\n\n",
                    state.revision_count(),
                    quote(state.draft())
                ),
                (Node::Reviewer, Some(message)) => format!(
                    "### Review of draft {}\n\n**Revision cap reached**: {}\n**Decision**: {} (forced)\n**Continue**: {}\n\n",
                    state.revision_count(),
                    message,
                    state.decision(),
                    state.should_continue()
                ),
                (Node::Reviewer, None) => format!(
                    "### Review of draft {}\n\n**Decision**: {}\n**Continue**: {}\n\n> {}\n\n",
                    state.revision_count(),
                    state.decision(),
                    state.should_continue(),
                    quote(state.feedback())
                ),
                (Node::Publisher, _) => format!(
                    "## Published\n\n**Revisions**: {}\n\n{}\n\n---\n\n",
                    state.revision_count(),
                    state.draft()
                ),
                (Node::End, _) => return Ok(()),
            };
            append(&path, &content).await
        })
        .await;
    }

    pub async fn log_run_error(&self, conversation_id: &str, node: Node, error: &str) {
        let path = self.path_for(conversation_id);
        fail_open("transcript::log_run_error", || async {
            let content = format!(
                "**Run stopped in {}**: {}\n\n---\n\n",
                node, error
            );
            append(&path, &content).await
        })
        .await;
    }
}

fn quote(text: &str) -> String {
    let preview = if text.chars().count() > PREVIEW_CHARS {
        let truncated: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    };
    preview.replace('\n', "\n> ")
}

async fn append(path: &Path, content: &str) -> redraft_core::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
