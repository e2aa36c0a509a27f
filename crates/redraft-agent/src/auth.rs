//! API key lookup for the Anthropic client
//!
//! Priority:
//! 1. `REDRAFT_API_KEY` (tool-specific key)
//! 2. the configured key variable (default `ANTHROPIC_API_KEY`)

use redraft_core::{RedraftError, Result};

pub const REDRAFT_API_KEY_ENV: &str = "REDRAFT_API_KEY";

/// Get the API key from the process environment
pub fn get_api_key(api_key_env: &str) -> Result<String> {
    resolve_api_key(api_key_env, |key| std::env::var(key).ok())
}

/// Resolve the API key through `lookup`
pub fn resolve_api_key<F>(api_key_env: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup(REDRAFT_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
        tracing::debug!("Using {}", REDRAFT_API_KEY_ENV);
        return Ok(key);
    }

    if let Some(key) = lookup(api_key_env).filter(|k| !k.trim().is_empty()) {
        tracing::debug!("Using {}", api_key_env);
        return Ok(key);
    }

    Err(RedraftError::Auth(format!(
        "No API key found. Set {} or {}",
        REDRAFT_API_KEY_ENV, api_key_env
    )))
}
