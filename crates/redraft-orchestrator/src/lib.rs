//! # redraft-orchestrator
//!
//! The write → review → publish revision loop.
//!
//! ```text
//! start → writer → reviewer ─┬─► writer
//!                            └─► publisher → end
//! ```
//!
//! The [`Orchestrator`] drives one node at a time per conversation and saves
//! a [`Checkpoint`] after each, so an interrupted run resumes at the node
//! that follows the last completed one.

pub mod checkpoint;
mod engine;
mod prompt;
mod publisher;
mod reviewer;
pub mod state_machine;
mod transcript;
mod writer;

pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use engine::{Orchestrator, RunOptions};
pub use prompt::{build_reviewer_messages, build_writer_messages};
pub use publisher::Publisher;
pub use reviewer::Reviewer;
pub use state_machine::{next_node, route, Node, Route};
pub use transcript::TranscriptLogger;
pub use writer::Writer;
