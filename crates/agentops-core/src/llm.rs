// Chat-completion interface
//
// All LLM usage in the substrate goes through this trait. Provider clients
// (OpenAI, Anthropic, Perplexity) are external collaborators implementing it
// out of tree; the in-tree implementation is a deterministic mock keyed on a
// mode marker, used by the planner/researcher/critic tests and the directive
// adjudicator.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a chat model implementation.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    #[error("LLM content filter: {0}")]
    ContentFilter(String),

    #[error("LLM request cancelled")]
    Cancelled,

    #[error("LLM provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// The chat-completion seam.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Deterministic mock chat model.
///
/// Responses are keyed on a `mode:<name>` marker found anywhere in the
/// request messages (system prompts carry it). Unknown modes echo the last
/// user message, so tests never see nondeterministic output.
pub struct MockChatModel {
    model: String,
    responses: HashMap<String, String>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self {
            model: "mock-chat".to_string(),
            responses: HashMap::new(),
        }
    }

    /// Register the canned response for a mode.
    pub fn with_response(mut self, mode: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(mode.into(), response.into());
        self
    }

    fn mode_of(request: &ChatRequest) -> Option<String> {
        for message in &request.messages {
            if let Some(idx) = message.content.find("mode:") {
                let rest = &message.content[idx + "mode:".len()..];
                let mode: String = rest
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                    .collect();
                if !mode.is_empty() {
                    return Some(mode);
                }
            }
        }
        None
    }
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let content = Self::mode_of(&request)
            .and_then(|mode| self.responses.get(&mode).cloned())
            .unwrap_or_else(|| {
                request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == ChatRole::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default()
            });

        // Stable pseudo-token accounting: 4 chars per token.
        let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
        Ok(ChatResponse {
            prompt_tokens: (prompt_chars / 4) as u32,
            completion_tokens: (content.len() / 4) as u32,
            content,
            model: self.model.clone(),
        })
    }
}
