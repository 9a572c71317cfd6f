//! HTTP-based LLM provider.
//!
//! Speaks the OpenAI-compatible chat completions and embeddings APIs
//! (OpenAI, Google Gemini's compatibility layer, DeepSeek, local proxies).

use crate::provider::{
    CompletionRequest, CompletionResponse, LlmError, LlmFuture, LlmProvider, ModelTier, Role,
    ToolDefinition,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

/// Inferred provider kind from model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Google,
    DeepSeek,
    /// Falls back to OpenAI defaults.
    Unknown,
}

impl ProviderKind {
    /// Infer provider from model name prefix.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.starts_with("gpt-") || m.starts_with("o1-") || m.starts_with("o3-") || m.starts_with("o4-") {
            Self::OpenAi
        } else if m.starts_with("gemini-") {
            Self::Google
        } else if m.starts_with("deepseek-") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Unknown => "https://api.openai.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::DeepSeek => "deepseek",
            Self::Unknown => "unknown",
        }
    }
}

/// Concrete model names per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierModels {
    pub fast: String,
    pub default: String,
    pub advanced: String,
    pub embedding: String,
}

impl TierModels {
    /// Every tier on the same model.
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            fast: model.clone(),
            default: model.clone(),
            advanced: model,
            embedding: DEFAULT_EMBED_MODEL.to_owned(),
        }
    }

    pub fn for_tier(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Default => &self.default,
            ModelTier::Advanced => &self.advanced,
        }
    }
}

// ── OpenAI-compatible request/response types ──

#[derive(Serialize)]
struct OaiRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool<'a>>,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OaiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OaiFunction<'a>,
}

#[derive(Serialize)]
struct OaiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDefinition> for OaiTool<'a> {
    fn from(td: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: OaiFunction {
                name: &td.name,
                description: &td.description,
                parameters: &td.input_schema,
            },
        }
    }
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

// ── Provider ──

/// HTTP-based LLM provider for OpenAI-compatible APIs.
pub struct HttpProvider {
    kind: ProviderKind,
    models: TierModels,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build from tier models + API key + optional base URL override.
    /// The provider kind is inferred from the default-tier model.
    pub fn new(models: TierModels, api_key: String, base_url: Option<String>) -> Self {
        let kind = ProviderKind::from_model(&models.default);
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            kind,
            models,
            client,
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn completions_endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn embeddings_endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn complete_openai(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = self.models.for_tier(request.tier);
        let body = OaiRequest {
            model,
            messages: request
                .messages
                .iter()
                .map(|m| OaiMessage { role: role_str(m.role), content: &m.content })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request.tools.iter().map(OaiTool::from).collect(),
        };

        let resp = self
            .client
            .post(self.completions_endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: OaiResponse = resp.json().await.map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let content = api
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let (input_tokens, output_tokens) = api
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        tracing::debug!(model, input_tokens, output_tokens, "completion finished");
        Ok(CompletionResponse { content, input_tokens, output_tokens })
    }

    async fn embed_openai(&self, text: String) -> Result<Vec<f32>, LlmError> {
        let body = EmbedRequest { model: &self.models.embedding, input: &text };

        let resp = self
            .client
            .post(self.embeddings_endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: EmbedResponse = resp.json().await.map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        api.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(LlmError::EmptyEmbedding)
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Parse error response, returning RateLimited for 429.
fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status.as_u16() == 429 {
        LlmError::RateLimited
    } else if status.is_server_error() {
        LlmError::Unavailable(format!("{status}: {body}"))
    } else {
        LlmError::RequestFailed(format!("{status}: {body}"))
    }
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        self.kind.label()
    }

    fn complete(&self, request: CompletionRequest) -> LlmFuture<'_, CompletionResponse> {
        Box::pin(self.complete_openai(request))
    }

    fn embed(&self, text: &str) -> LlmFuture<'_, Vec<f32>> {
        Box::pin(self.embed_openai(text.to_owned()))
    }
}

/// Build an `HttpProvider` from environment variables.
///
/// Reads `HANA_LLM_MODEL` and `HANA_LLM_API_KEY` (both required), and
/// optionally `HANA_LLM_FAST_MODEL`, `HANA_LLM_ADVANCED_MODEL`,
/// `HANA_LLM_EMBED_MODEL` and `HANA_LLM_BASE_URL`.
/// Returns `None` if model or key is not set.
pub fn from_env() -> Option<HttpProvider> {
    let model = std::env::var("HANA_LLM_MODEL").ok()?;
    let api_key = std::env::var("HANA_LLM_API_KEY").ok()?;
    let base_url = std::env::var("HANA_LLM_BASE_URL").ok();

    let mut models = TierModels::uniform(model);
    if let Ok(fast) = std::env::var("HANA_LLM_FAST_MODEL") {
        models.fast = fast;
    }
    if let Ok(advanced) = std::env::var("HANA_LLM_ADVANCED_MODEL") {
        models.advanced = advanced;
    }
    if let Ok(embedding) = std::env::var("HANA_LLM_EMBED_MODEL") {
        models.embedding = embedding;
    }
    Some(HttpProvider::new(models, api_key, base_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_openai_models() {
        assert_eq!(ProviderKind::from_model("gpt-4o"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_model("gpt-4o-mini"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_model("o3-mini"), ProviderKind::OpenAi);
    }

    #[test]
    fn infer_other_models() {
        assert_eq!(ProviderKind::from_model("gemini-2.0-flash"), ProviderKind::Google);
        assert_eq!(ProviderKind::from_model("deepseek-chat"), ProviderKind::DeepSeek);
        assert_eq!(ProviderKind::from_model("llama-3"), ProviderKind::Unknown);
        assert_eq!(ProviderKind::from_model("GPT-4o"), ProviderKind::OpenAi);
    }

    #[test]
    fn tiers_map_to_models() {
        let mut models = TierModels::uniform("gpt-4o-mini");
        models.advanced = "gpt-4o".into();
        assert_eq!(models.for_tier(ModelTier::Fast), "gpt-4o-mini");
        assert_eq!(models.for_tier(ModelTier::Default), "gpt-4o-mini");
        assert_eq!(models.for_tier(ModelTier::Advanced), "gpt-4o");
        assert_eq!(models.embedding, DEFAULT_EMBED_MODEL);
    }

    #[test]
    fn endpoints_follow_base_url() {
        let p = HttpProvider::new(TierModels::uniform("gpt-4o"), "sk-test".into(), None);
        assert_eq!(p.completions_endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(p.embeddings_endpoint(), "https://api.openai.com/v1/embeddings");
        assert_eq!(p.name(), "openai");

        let p = HttpProvider::new(
            TierModels::uniform("gpt-4o"),
            "sk-test".into(),
            Some("https://my-proxy.com/v1/".into()),
        );
        assert_eq!(p.completions_endpoint(), "https://my-proxy.com/v1/chat/completions");
    }

    #[test]
    fn tools_serialize_as_functions() {
        let tool = ToolDefinition {
            name: "price".into(),
            description: "token price".into(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_value(OaiTool::from(&tool)).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "price");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn rate_limit_is_classified() {
        assert!(matches!(
            check_error(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()),
            LlmError::RateLimited
        ));
        assert!(matches!(
            check_error(reqwest::StatusCode::BAD_GATEWAY, String::new()),
            LlmError::Unavailable(_)
        ));
    }
}
