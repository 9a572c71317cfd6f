use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Abstract model class. Providers map each tier to a concrete model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    #[default]
    Default,
    Advanced,
}

/// Tool definition forwarded to the model (name + description + JSON Schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tier: ModelTier,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Optional tools (empty = no tools).
    pub tools: Vec<ToolDefinition>,
}

/// LLM completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Error type for LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("embedding response was empty")]
    EmptyEmbedding,
}

pub type LlmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// Trait for LLM providers. Implementations must be safe to call from
/// several tasks at once; any serialization is their own business.
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, request: CompletionRequest) -> LlmFuture<'_, CompletionResponse>;

    /// Embed a single text into a dense vector.
    fn embed(&self, text: &str) -> LlmFuture<'_, Vec<f32>>;
}

/// Mock provider for testing.
///
/// Completions are served from a script in FIFO order; once the script runs
/// out, the fallback response repeats. Every request is recorded.
#[derive(Debug)]
pub struct MockProvider {
    fallback: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    embedded: Mutex<Vec<String>>,
    embedding: Vec<f32>,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            fallback: response.into(),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            embedded: Mutex::new(Vec::new()),
            embedding: vec![0.1, 0.2, 0.3],
        }
    }

    /// Queue one scripted completion ahead of the fallback.
    pub fn then(self, response: impl Into<String>) -> Self {
        self.lock_script().push_back(Ok(response.into()));
        self
    }

    /// Queue one scripted completion failure.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.lock_script().push_back(Err(message.into()));
        self
    }

    /// All completion requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// All texts passed to `embed` so far.
    pub fn embedded_texts(&self) -> Vec<String> {
        self.embedded.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(&self, request: CompletionRequest) -> LlmFuture<'_, CompletionResponse> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }
        let next = self.lock_script().pop_front().unwrap_or_else(|| Ok(self.fallback.clone()));
        Box::pin(async move {
            let content = next.map_err(LlmError::RequestFailed)?;
            Ok(CompletionResponse { content, input_tokens: 10, output_tokens: 20 })
        })
    }

    fn embed(&self, text: &str) -> LlmFuture<'_, Vec<f32>> {
        if let Ok(mut log) = self.embedded.lock() {
            log.push(text.to_owned());
        }
        let vector = self.embedding.clone();
        Box::pin(async move { Ok(vector) })
    }
}
