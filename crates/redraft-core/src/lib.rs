//! # redraft-core
//!
//! Core types for the redraft write → review → publish loop.
//!
//! - [`RevisionState`]: the record threaded through the loop, with its
//!   counter and continue-flag invariants enforced by its mutators
//! - [`ConversationLog`]: append-only audit trail of every role's output
//! - [`Decision`]: the reviewer verdict and its ambiguity-safe classifier
//! - [`RedraftConfig`]: file + environment configuration

pub mod config;
mod error;
pub mod fail_open;
mod state;
mod types;

pub use config::{LoopSettings, ModelConfig, PromptConfig, Prompts, RedraftConfig};
pub use error::{RedraftError, Result};
pub use state::RevisionState;
pub use types::*;
