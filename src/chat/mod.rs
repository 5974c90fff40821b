//! Reply generation via chat completion APIs
//!
//! [`ReplyGenerator`] owns the conversation memory. The whole (bounded)
//! history is resent on every call; no server-side session is assumed.

mod offline;

pub use offline::{OfflineChat, THINKING_DELAY};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::with_timeout;
use crate::memory::{ConversationMemory, Utterance};
use crate::persona::Persona;
use crate::{Error, Result};

/// Reply used whenever the provider fails
pub const FALLBACK_REPLY: &str = "Sorry, I had trouble understanding. Could you try again?";

/// Default `OpenAI` API base
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat completion request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// One message in a chat completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn from_utterance(utterance: &Utterance) -> Self {
        Self {
            role: utterance.role.as_str(),
            content: utterance.text.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// A language-generation backend
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send one request and return the reply text
    ///
    /// # Errors
    ///
    /// Returns error if the provider fails or returns no content
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// `OpenAI`-compatible chat completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiChat {
    /// Create a client against the public `OpenAI` API
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, OPENAI_BASE_URL.to_string())
    }

    /// Create a client against any `OpenAI`-compatible endpoint
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Chat(format!("chat API error {status}: {body}")));
        }

        let result: ChatCompletionResponse = response.json().await?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Chat("response contained no content".to_string()))
    }

    fn name(&self) -> &'static str {
        "openai-chat"
    }
}

/// Outcome of one generation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text to speak or display
    pub text: String,

    /// True when the provider failed and `text` is [`FALLBACK_REPLY`]
    pub fallback: bool,
}

/// Settings for [`ReplyGenerator`]
#[derive(Debug, Clone)]
pub struct ReplyOptions {
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub memory_limit: usize,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            max_tokens: 300,
            timeout: Duration::from_secs(20),
            memory_limit: crate::memory::DEFAULT_MEMORY_LIMIT,
        }
    }
}

/// Generates replies and keeps the conversation memory
pub struct ReplyGenerator {
    provider: Arc<dyn ChatProvider>,
    persona: Persona,
    options: ReplyOptions,
    memory: Mutex<ConversationMemory>,
}

impl ReplyGenerator {
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>, persona: Persona, options: ReplyOptions) -> Self {
        let memory = Mutex::new(ConversationMemory::new(options.memory_limit));
        Self {
            provider,
            persona,
            options,
            memory,
        }
    }

    /// Build the request for `input` given the current memory
    ///
    /// Pure: identical persona, memory and input give an identical request.
    #[must_use]
    pub fn build_request(&self, memory: &ConversationMemory, input: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(memory.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: self.persona.system_prompt(),
        });
        messages.extend(memory.iter().map(ChatMessage::from_utterance));
        messages.push(ChatMessage {
            role: "user",
            content: input.to_string(),
        });

        ChatRequest {
            model: self.options.model.clone(),
            messages,
            max_tokens: self.options.max_tokens,
        }
    }

    /// Generate a reply to `input`
    ///
    /// Memory is only updated when the provider succeeds. Failures yield
    /// [`FALLBACK_REPLY`] instead of an error.
    pub async fn reply(&self, input: &str) -> Reply {
        let request = {
            let memory = self.lock_memory();
            self.build_request(&memory, input)
        };

        let result = with_timeout(
            "chat completion",
            self.options.timeout,
            self.provider.complete(&request),
        )
        .await;

        match result {
            Ok(text) => {
                self.lock_memory().record_exchange(input, text.as_str());
                tracing::debug!(
                    provider = self.provider.name(),
                    reply_len = text.len(),
                    "reply generated"
                );
                Reply {
                    text,
                    fallback: false,
                }
            }
            Err(e) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "reply generation failed");
                Reply {
                    text: FALLBACK_REPLY.to_string(),
                    fallback: true,
                }
            }
        }
    }

    /// Copy of the conversation memory, oldest first
    #[must_use]
    pub fn memory(&self) -> Vec<Utterance> {
        self.lock_memory().snapshot()
    }

    /// Seed or inspect memory directly
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut ConversationMemory) -> R) -> R {
        f(&mut self.lock_memory())
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, ConversationMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ChatProvider for Echo {
        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("echo: {last}"))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    struct Failing;

    #[async_trait]
    impl ChatProvider for Failing {
        async fn complete(&self, _request: &ChatRequest) -> Result<String> {
            Err(Error::Chat("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn generator(provider: Arc<dyn ChatProvider>) -> ReplyGenerator {
        ReplyGenerator::new(provider, Persona::new("Fox", "You are {name}."), ReplyOptions::default())
    }

    #[test]
    fn test_request_layout() {
        let generator = generator(Arc::new(Echo));
        let mut memory = ConversationMemory::new(10);
        memory.record_exchange("Hi", "Hello!");

        let request = generator.build_request(&memory, "How are you?");

        let roles: Vec<_> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(request.messages[0].content, "You are Fox.");
        assert_eq!(request.messages[3].content, "How are you?");
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.max_tokens, 300);
    }

    #[test]
    fn test_request_payload_is_reproducible() {
        let generator = generator(Arc::new(Echo));
        let mut memory = ConversationMemory::new(10);
        memory.record_exchange("Hi", "Hello!");

        let a = serde_json::to_vec(&generator.build_request(&memory, "Hello")).unwrap();
        let b = serde_json::to_vec(&generator.build_request(&memory.clone(), "Hello")).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_success_records_both_sides() {
        let generator = generator(Arc::new(Echo));

        let reply = generator.reply("Hello").await;

        assert_eq!(reply.text, "echo: Hello");
        assert!(!reply.fallback);
        assert_eq!(
            generator.memory(),
            vec![Utterance::user("Hello"), Utterance::assistant("echo: Hello")]
        );
    }

    #[tokio::test]
    async fn test_failure_returns_apology_and_keeps_memory() {
        let generator = generator(Arc::new(Failing));
        generator.with_memory(|m| m.record_exchange("earlier", "reply"));

        let reply = generator.reply("Hello").await;

        assert_eq!(reply.text, FALLBACK_REPLY);
        assert!(reply.fallback);
        assert_eq!(generator.memory().len(), 2);
    }

    #[test]
    fn test_openai_requires_key() {
        assert!(OpenAiChat::new(String::new()).is_err());
        assert!(OpenAiChat::new("sk-test".to_string()).is_ok());
    }
}
