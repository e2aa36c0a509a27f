//! # redraft-agent
//!
//! Language-model capabilities consumed by the redraft revision loop.
//!
//! - [`Generator`]: free-text generation over a chat message list
//! - [`DecisionExtractor`]: maps reviewer prose to a raw APPROVE/REVISE label
//! - [`AnthropicClient`]: Messages API implementation with rate-limit retry
//!   and a circuit breaker
//! - [`LlmDecisionExtractor`]: structured extraction on top of any generator
//! - [`mock`]: scripted doubles for tests

mod auth;
mod capability;
mod circuit_breaker;
mod client;
mod decision;
pub mod mock;
mod types;

pub use auth::{get_api_key, resolve_api_key, REDRAFT_API_KEY_ENV};
pub use capability::{ChatMessage, ChatRole, DecisionExtractor, Generator};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::AnthropicClient;
pub use decision::{parse_decision_label, LlmDecisionExtractor};
pub use types::*;
