//! LLM client adapter: the boundary between the engine and whatever model
//! backend actually generates program text.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOpts {
    /// When set, the adapter must constrain generation to this JSON schema.
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request timed out")]
    Timeout,
    #[error("llm transport error: {0}")]
    Http(String),
    #[error("llm error: {0}")]
    Other(String),
}

use thiserror::Error;

/// Adapter contract: given a history, produce one reply. Absent an
/// explicit schema, implementations are expected to constrain the model to
/// emit `{"reasoning": string, "code": string}`.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        timeout: Duration,
        opts: &ChatOpts,
    ) -> Result<ChatReply, LlmError>;
}

/// Queue-and-log test double: returns each queued reply in order, logging
/// every request it receives. Errors once the queue is exhausted. Optional
/// injected latency/timeout lets a test exercise the engine's
/// timeout-handling paths.
pub struct MockLlmAdapter {
    replies: Mutex<VecDeque<Result<ChatReply, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    latency: Option<Duration>,
}

impl MockLlmAdapter {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    pub fn with_reply(self, reply: ChatReply) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(ChatReply {
            text: text.into(),
            usage: Usage::default(),
        })
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockLlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for MockLlmAdapter {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        timeout: Duration,
        _opts: &ChatOpts,
    ) -> Result<ChatReply, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());

        if let Some(latency) = self.latency {
            if latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(LlmError::Timeout);
            }
            tokio::time::sleep(latency).await;
        }

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Other("mock adapter exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_queued_replies_in_order() {
        let adapter = MockLlmAdapter::new().with_text("first").with_text("second");
        let r1 = adapter
            .chat(&[], "model", Duration::from_secs(1), &ChatOpts::default())
            .await
            .unwrap();
        let r2 = adapter
            .chat(&[], "model", Duration::from_secs(1), &ChatOpts::default())
            .await
            .unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
        assert_eq!(adapter.request_count(), 2);
    }

    #[tokio::test]
    async fn errors_when_exhausted() {
        let adapter = MockLlmAdapter::new();
        let result = adapter
            .chat(&[], "model", Duration::from_secs(1), &ChatOpts::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn simulated_latency_beyond_timeout_yields_timeout_error() {
        let adapter = MockLlmAdapter::new()
            .with_text("slow")
            .with_latency(Duration::from_millis(50));
        let result = adapter
            .chat(&[], "model", Duration::from_millis(5), &ChatOpts::default())
            .await;
        assert!(matches!(result, Err(LlmError::Timeout)));
    }
}
