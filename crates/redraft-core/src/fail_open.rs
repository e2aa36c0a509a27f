//! Fail-open helper for infrastructure side effects
//!
//! Use this for work that must never fail a run: transcript writes and
//! similar bookkeeping. Never for role execution or checkpoint saves.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run an operation whose failure should be logged and swallowed
///
/// Returns `None` (after a `warn!`) when the operation errors.
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
