use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{Manager, ManagerError, ManagerId, strip_code_fence};
use crate::store::Store;
use crate::types::{ConversationState, Insight, InsightScope};
use hana_llm::provider::{ChatMessage, CompletionRequest, LlmProvider, ModelTier};

pub const SESSION_INSIGHTS: &str = "session_insights";
pub const ACTOR_INSIGHTS: &str = "actor_insights";
pub const UNIQUE_INSIGHTS: &str = "unique_insights";

const EXTRACTION_PROMPT: &str = "You keep notes for a social media account. \
Read the message and extract short, factual insights worth remembering. \
\"session\" insights describe the conversation thread, \"actor\" insights describe the author, \
\"unique\" insights are standalone facts or opinions worth recalling in any conversation. \
Each insight is one sentence. Leave a list empty when nothing fits. \
Respond with JSON only: {\"session\": [...], \"actor\": [...], \"unique\": [...]}.";

#[derive(Debug, Default, Deserialize)]
struct Extracted {
    #[serde(default)]
    session: Vec<String>,
    #[serde(default)]
    actor: Vec<String>,
    #[serde(default)]
    unique: Vec<String>,
}

fn parse_extracted(raw: &str) -> Result<Extracted, ManagerError> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| ManagerError::InvalidOutput(format!("insights: {e}")))
}

/// Bullet list, one insight per line.
pub fn render_insights(insights: &[Insight]) -> String {
    insights
        .iter()
        .map(|i| format!("- {}", i.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts insights from each inbound message and recalls the stored ones
/// for the thread, the author and in general.
///
/// Extraction is best effort: a model or parse failure is logged and the
/// run continues without new insights.
pub struct InsightManager {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn Store>,
    limit: usize,
}

impl InsightManager {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn Store>, limit: usize) -> Self {
        Self { llm, store, limit }
    }

    async fn extract(&self, state: &ConversationState) -> Result<Extracted, ManagerError> {
        let author = state.input.metadata_str("author_handle").unwrap_or("unknown");
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(EXTRACTION_PROMPT),
                ChatMessage::user(format!("@{author}: {}", state.input.content)),
            ],
            tier: ModelTier::Fast,
            max_tokens: 512,
            temperature: 0.2,
            tools: vec![],
        };
        let response = self.llm.complete(request).await?;
        parse_extracted(&response.content)
    }
}

#[async_trait::async_trait]
impl Manager for InsightManager {
    fn id(&self) -> ManagerId {
        ManagerId::Insight
    }

    async fn process(&self, state: &mut ConversationState) -> Result<(), ManagerError> {
        if state.is_seed() || state.input.content.trim().is_empty() {
            return Ok(());
        }

        let extracted = match self.extract(state).await {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(fragment = %state.input.id, error = %e, "insight extraction failed");
                return Ok(());
            }
        };

        let scoped = [
            (InsightScope::Session, extracted.session),
            (InsightScope::Actor, extracted.actor),
            (InsightScope::Unique, extracted.unique),
        ];
        let mut stored = 0usize;
        for (scope, texts) in scoped {
            let texts = texts.iter().map(|t| t.trim()).filter(|t| !t.is_empty());
            for (n, text) in texts.enumerate() {
                self.store
                    .store_insight(&Insight::extracted(&state.input, scope, n, text))
                    .await?;
                stored += 1;
            }
        }
        tracing::debug!(fragment = %state.input.id, stored, "insights extracted");
        Ok(())
    }

    async fn context(&self, state: &ConversationState) -> Result<Vec<(String, Value)>, ManagerError> {
        let lookups = [
            (SESSION_INSIGHTS, InsightScope::Session, Some(state.input.session_id)),
            (ACTOR_INSIGHTS, InsightScope::Actor, Some(state.input.actor_id)),
            (UNIQUE_INSIGHTS, InsightScope::Unique, None),
        ];
        let mut entries = Vec::with_capacity(lookups.len());
        for (key, scope, subject) in lookups {
            let insights = self.store.insights(scope, subject, self.limit).await?;
            entries.push((key.to_owned(), Value::String(render_insights(&insights))));
        }
        Ok(entries)
    }
}
