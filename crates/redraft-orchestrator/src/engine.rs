//! Run driver: executes the graph one node at a time with checkpoints
//!
//! Each completed node's state is saved, together with the node that follows,
//! before that node starts. A failed, cancelled or timed-out node contributes
//! nothing; the last checkpoint stays as it was and `resume` picks up there.
//!
//! Every save names the step it was derived from, so when two orchestrators
//! (or two processes) share a store only one of them can advance a
//! conversation; the other stops with `CheckpointConflict`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use redraft_agent::{DecisionExtractor, Generator};
use redraft_core::{LoopSettings, Prompts, RedraftError, Result, RevisionState};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::checkpoint::{validate_conversation_id, Checkpoint, CheckpointStore};
use crate::publisher::Publisher;
use crate::reviewer::Reviewer;
use crate::state_machine::{next_node, Node};
use crate::transcript::TranscriptLogger;
use crate::writer::Writer;

/// Per-run controls supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Upper bound on a single node, including its model calls
    pub node_timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock(in_flight: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match in_flight.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Marks a conversation busy until dropped
struct RunGuard {
    in_flight: InFlight,
    conversation_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.conversation_id);
    }
}

/// Wires writer, reviewer and publisher into the revision graph
pub struct Orchestrator<G, D> {
    writer: Writer<G>,
    reviewer: Reviewer<G, D>,
    publisher: Publisher,
    store: Arc<dyn CheckpointStore>,
    in_flight: InFlight,
    transcript: Option<TranscriptLogger>,
}

impl<G, D> Orchestrator<G, D>
where
    G: Generator + Clone,
    D: DecisionExtractor,
{
    pub fn new(
        generator: G,
        extractor: D,
        store: Arc<dyn CheckpointStore>,
        settings: LoopSettings,
        prompts: Prompts,
    ) -> Self {
        Self {
            writer: Writer::new(generator.clone(), prompts.writer),
            reviewer: Reviewer::new(generator, extractor, prompts.reviewer, settings),
            publisher: Publisher,
            store,
            in_flight: Arc::default(),
            transcript: None,
        }
    }

    /// Also write a markdown transcript per conversation
    pub fn with_transcript(mut self, transcript: TranscriptLogger) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        self.reviewer.settings()
    }

    /// Last saved checkpoint for a conversation
    pub async fn checkpoint(&self, conversation_id: &str) -> Result<Option<Checkpoint>> {
        validate_conversation_id(conversation_id)?;
        self.store.load(conversation_id).await
    }

    /// Run the loop for `message` to completion
    pub async fn run(&self, message: &str, conversation_id: &str) -> Result<RevisionState> {
        self.run_with(message, conversation_id, RunOptions::default())
            .await
    }

    /// Run the loop with a timeout and/or cancellation token
    ///
    /// An unfinished checkpoint for the same message is resumed; one for a
    /// different message is a conflict. A finished checkpoint starts a
    /// follow-up run that keeps the conversation log.
    pub async fn run_with(
        &self,
        message: &str,
        conversation_id: &str,
        options: RunOptions,
    ) -> Result<RevisionState> {
        if message.trim().is_empty() {
            return Err(RedraftError::EmptyMessage);
        }
        validate_conversation_id(conversation_id)?;
        let _guard = self.acquire(conversation_id)?;

        let checkpoint = match self.store.load(conversation_id).await? {
            None => {
                let checkpoint =
                    Checkpoint::start(conversation_id, RevisionState::new(message)?, 0);
                self.store.save(&checkpoint, None).await?;
                info!(conversation = %conversation_id, "Starting new run");
                checkpoint
            }
            Some(previous) if previous.is_finished() => {
                let mut state = previous.state;
                state.begin_follow_up(message)?;
                let checkpoint = Checkpoint::start(conversation_id, state, previous.step);
                self.store.save(&checkpoint, Some(previous.step)).await?;
                info!(
                    conversation = %conversation_id,
                    history = checkpoint.state.log().len(),
                    "Starting follow-up run"
                );
                checkpoint
            }
            Some(previous) if previous.state.original_message() == message => {
                info!(
                    conversation = %conversation_id,
                    next = %previous.next,
                    step = previous.step,
                    "Resuming unfinished run"
                );
                previous
            }
            Some(previous) => {
                return Err(RedraftError::CheckpointConflict(format!(
                    "{} has an unfinished run for a different message (next: {})",
                    conversation_id, previous.next
                )));
            }
        };

        if let Some(transcript) = &self.transcript {
            transcript
                .log_run_start(conversation_id, &checkpoint.state, checkpoint.next)
                .await;
        }
        self.drive(checkpoint, &options).await
    }

    /// Resume a conversation from its last checkpoint
    pub async fn resume(&self, conversation_id: &str) -> Result<RevisionState> {
        self.resume_with(conversation_id, RunOptions::default())
            .await
    }

    /// Resume with a timeout and/or cancellation token
    ///
    /// A finished conversation returns its stored state without running
    /// anything.
    pub async fn resume_with(
        &self,
        conversation_id: &str,
        options: RunOptions,
    ) -> Result<RevisionState> {
        validate_conversation_id(conversation_id)?;
        let _guard = self.acquire(conversation_id)?;

        let checkpoint = self
            .store
            .load(conversation_id)
            .await?
            .ok_or_else(|| RedraftError::CheckpointNotFound(conversation_id.to_string()))?;

        if checkpoint.is_finished() {
            info!(conversation = %conversation_id, "Conversation already finished");
            return Ok(checkpoint.state);
        }

        info!(
            conversation = %conversation_id,
            next = %checkpoint.next,
            step = checkpoint.step,
            "Resuming from checkpoint"
        );
        self.drive(checkpoint, &options).await
    }

    fn acquire(&self, conversation_id: &str) -> Result<RunGuard> {
        let mut in_flight = lock(&self.in_flight);
        if !in_flight.insert(conversation_id.to_string()) {
            return Err(RedraftError::ConversationBusy(conversation_id.to_string()));
        }
        Ok(RunGuard {
            in_flight: Arc::clone(&self.in_flight),
            conversation_id: conversation_id.to_string(),
        })
    }

    async fn drive(&self, mut checkpoint: Checkpoint, options: &RunOptions) -> Result<RevisionState> {
        let conversation_id = checkpoint.conversation_id.clone();

        while !checkpoint.is_finished() {
            let node = checkpoint.next;
            let span = info_span!(
                "node",
                conversation = %conversation_id,
                node = %node,
                step = checkpoint.step + 1
            );

            let state = match self
                .execute(&conversation_id, node, &checkpoint.state, options)
                .instrument(span)
                .await
            {
                Ok(state) => state,
                Err(e) => {
                    warn!(conversation = %conversation_id, %node, error = %e, "Run stopped");
                    if let Some(transcript) = &self.transcript {
                        transcript
                            .log_run_error(&conversation_id, node, &e.to_string())
                            .await;
                    }
                    return Err(e);
                }
            };

            let next = next_node(node, &state);
            let read_step = checkpoint.step;
            checkpoint.advance(state, next);
            if let Err(e) = self.store.save(&checkpoint, Some(read_step)).await {
                warn!(
                    conversation = %conversation_id,
                    %node,
                    error = %e,
                    "Discarding node result, checkpoint not saved"
                );
                return Err(e);
            }

            if let Some(transcript) = &self.transcript {
                let cap_message = self.cap_message(node, &checkpoint.state);
                transcript
                    .log_node(&conversation_id, node, &checkpoint.state, cap_message)
                    .await;
            }
        }

        info!(
            conversation = %conversation_id,
            revisions = checkpoint.state.revision_count(),
            decision = %checkpoint.state.decision(),
            "Run complete"
        );
        Ok(checkpoint.state)
    }

    /// Cap message when `node` was a review forced by the revision cap
    fn cap_message(&self, node: Node, state: &RevisionState) -> Option<&str> {
        let settings = self.settings();
        (node == Node::Reviewer && state.revision_count() >= settings.max_revisions)
            .then_some(settings.max_revisions_message.as_str())
    }

    /// Run one node, racing it against cancellation and the node timeout
    async fn execute(
        &self,
        conversation_id: &str,
        node: Node,
        state: &RevisionState,
        options: &RunOptions,
    ) -> Result<RevisionState> {
        let cancelled = || RedraftError::Cancelled {
            conversation_id: conversation_id.to_string(),
            node: node.to_string(),
        };
        if options.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let work = async {
            match options.node_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.run_node(node, state)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(RedraftError::Timeout {
                        node: node.to_string(),
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    }),
                },
                None => self.run_node(node, state).await,
            }
        };

        tokio::select! {
            biased;
            _ = options.cancel.cancelled() => Err(cancelled()),
            result = work => result,
        }
    }

    async fn run_node(&self, node: Node, state: &RevisionState) -> Result<RevisionState> {
        match node {
            Node::Writer => self.writer.write(state).await,
            Node::Reviewer => self.reviewer.review(state).await,
            Node::Publisher => Ok(self.publisher.publish(state)),
            Node::End => Ok(state.clone()),
        }
    }
}
