//! Scripted capability doubles for tests
//!
//! Both doubles replay a queue of steps, record every call, and are cheap to
//! clone (clones share the same script and call log).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redraft_core::{RedraftError, Result};

use crate::capability::{ChatMessage, DecisionExtractor, Generator};

/// One scripted response
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this text
    Reply(String),
    /// Fail with a generation error carrying this message
    Fail(String),
    /// Wait, then return the text
    Delayed(Duration, String),
    /// Never complete (for timeout and cancellation tests)
    Hang,
}

impl From<&str> for Step {
    fn from(text: &str) -> Self {
        Step::Reply(text.to_string())
    }
}

impl From<String> for Step {
    fn from(text: String) -> Self {
        Step::Reply(text)
    }
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    /// Used once `steps` is exhausted
    fallback: Option<String>,
    calls: Vec<String>,
    requests: Vec<Vec<ChatMessage>>,
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    match script.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Script {
    fn next_step(&mut self) -> Step {
        match self.steps.pop_front() {
            Some(step) => step,
            None => match &self.fallback {
                Some(text) => Step::Reply(text.clone()),
                None => Step::Fail("script exhausted".to_string()),
            },
        }
    }
}

async fn play(step: Step) -> Result<String> {
    match step {
        Step::Reply(text) => Ok(text),
        Step::Fail(message) => Err(RedraftError::Generation(message)),
        Step::Delayed(delay, text) => {
            tokio::time::sleep(delay).await;
            Ok(text)
        }
        Step::Hang => std::future::pending().await,
    }
}

/// Scripted [`Generator`]
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGenerator {
    pub fn new<S: Into<Step>>(steps: impl IntoIterator<Item = S>) -> Self {
        let script = Script {
            steps: steps.into_iter().map(Into::into).collect(),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// Always answer with `text`
    pub fn repeating(text: impl Into<String>) -> Self {
        let generator = Self::default();
        lock(&generator.script).fallback = Some(text.into());
        generator
    }

    /// Answer with `text` once the scripted steps run out
    pub fn then_repeat(self, text: impl Into<String>) -> Self {
        lock(&self.script).fallback = Some(text.into());
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.script).requests.len()
    }

    /// Every message list passed to `generate`, in call order
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.script).requests.clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let step = {
            let mut script = lock(&self.script);
            script.requests.push(messages.to_vec());
            script.next_step()
        };
        play(step).await
    }
}

/// Scripted [`DecisionExtractor`]
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecisions {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDecisions {
    pub fn new<S: Into<Step>>(labels: impl IntoIterator<Item = S>) -> Self {
        let script = Script {
            steps: labels.into_iter().map(Into::into).collect(),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// Always answer with `label`
    pub fn always(label: impl Into<String>) -> Self {
        let decisions = Self::default();
        lock(&decisions.script).fallback = Some(label.into());
        decisions
    }

    pub fn call_count(&self) -> usize {
        lock(&self.script).calls.len()
    }

    /// Every feedback string passed to `extract_decision`, in call order
    pub fn feedback_seen(&self) -> Vec<String> {
        lock(&self.script).calls.clone()
    }
}

#[async_trait]
impl DecisionExtractor for ScriptedDecisions {
    async fn extract_decision(&self, feedback: &str) -> Result<String> {
        let step = {
            let mut script = lock(&self.script);
            script.calls.push(feedback.to_string());
            script.next_step()
        };
        play(step).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generator_replays_then_falls_back() {
        let generator = ScriptedGenerator::new(vec!["one"]).then_repeat("again");
        assert_eq!(generator.generate(&[]).await.unwrap(), "one");
        assert_eq!(generator.generate(&[]).await.unwrap(), "again");
        assert_eq!(generator.generate(&[]).await.unwrap(), "again");
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_script_fails() {
        let generator = ScriptedGenerator::new(Vec::<Step>::new());
        assert!(matches!(
            generator.generate(&[]).await,
            Err(RedraftError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let decisions = ScriptedDecisions::always("REVISE");
        let clone = decisions.clone();
        clone.extract_decision("needs work").await.unwrap();
        assert_eq!(decisions.call_count(), 1);
        assert_eq!(decisions.feedback_seen(), vec!["needs work".to_string()]);
    }
}
