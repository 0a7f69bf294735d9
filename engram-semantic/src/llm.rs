//! Chat-completion LLM client interface.
//!
//! The distillation pipeline needs two calls: free-text completion and
//! structured (JSON) completion against a schema. Vendor bindings live
//! outside this workspace; `ScriptedLlm` provides deterministic behaviour
//! for tests, including a call counter so tests can assert that a path made
//! no LLM call at all.

use async_trait::async_trait;
use engram_core::error::{EngramError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Trait for chat-completion LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-text completion.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Structured completion: the returned value conforms to `schema`
    /// (JSON Schema); callers deserialize into their own types.
    async fn structured_invoke(
        &self,
        messages: &[ChatMessage],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Structured(serde_json::Value),
    Failure(String),
}

/// Deterministic LLM client for tests.
///
/// Replies are popped from a queue in order; when the queue is empty, a
/// fixed default reply is returned. Every call increments the call counter.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a free-text reply.
    pub fn push_text(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Text(text.into()));
    }

    /// Queue a structured reply.
    pub fn push_structured(&self, value: serde_json::Value) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Structured(value));
    }

    /// Queue a failing reply.
    pub fn push_failure(&self, msg: impl Into<String>) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Failure(msg.into()));
    }

    /// Total number of `invoke`/`structured_invoke` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        self.replies.lock().pop_front()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_reply() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Structured(value)) => Ok(value.to_string()),
            Some(ScriptedReply::Failure(msg)) => Err(EngramError::llm(msg)),
            None => Ok("ok".to_string()),
        }
    }

    async fn structured_invoke(
        &self,
        _messages: &[ChatMessage],
        _schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_reply() {
            Some(ScriptedReply::Structured(value)) => Ok(value),
            Some(ScriptedReply::Text(text)) => {
                serde_json::from_str(&text).map_err(EngramError::from)
            }
            Some(ScriptedReply::Failure(msg)) => Err(EngramError::llm(msg)),
            None => Ok(serde_json::Value::Null),
        }
    }
}
