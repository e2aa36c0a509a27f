//! Publisher role: terminal node marking the approved draft as final

use redraft_core::RevisionState;
use tracing::info;

/// Terminal node; returns the state unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Publisher;

impl Publisher {
    pub fn publish(&self, state: &RevisionState) -> RevisionState {
        info!(
            revision = state.revision_count(),
            decision = %state.decision(),
            "Final response ready to publish"
        );
        state.clone()
    }
}
