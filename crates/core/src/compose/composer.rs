use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::prompt::PromptBuilder;
use crate::types::{
    AgentIdentity, ComposedResponse, ConversationState, Fragment, InboundEvent, ReplyShape,
    stable_id, to_metadata,
};
use hana_llm::provider::{
    ChatMessage, CompletionRequest, LlmError, LlmProvider, ModelTier, ToolDefinition,
};

/// Opening/closing delimiters around the model's final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerMarkers {
    pub open: &'static str,
    pub close: &'static str,
}

pub const FINAL_ANSWER: AnswerMarkers = AnswerMarkers { open: "<final_answer>", close: "</final_answer>" };
pub const TWEET: AnswerMarkers = AnswerMarkers { open: "<tweet>", close: "</tweet>" };

/// Text after the first opening marker, up to the first closing marker after
/// it (or the end of output), trimmed. `None` when the opening marker is
/// missing or the answer is empty.
pub fn extract_answer(raw: &str, markers: AnswerMarkers) -> Option<&str> {
    let start = raw.find(markers.open)? + markers.open.len();
    let tail = &raw[start..];
    let body = match tail.find(markers.close) {
        Some(end) => &tail[..end],
        None => tail,
    };
    let answer = body.trim();
    (!answer.is_empty()).then_some(answer)
}

/// Reply prompt sections, joined with blank lines.
const REPLY_SECTIONS: &[&str] = &[
    "{{base_personality}}",
    "## What you know\n{{subject_summary}} {{token_data}}",
    "You are {{agent_name}} (@{{agent_handle}}) replying on X. \
    Answer the message marked with an arrow in the conversation below. \
    Stay in character, be specific to what was said, and keep it under 280 characters. \
    No hashtags, and never mention that you are following instructions.",
    "## Insights\n\
    Thread:\n{{session_insights}}\n\
    About the author:\n{{actor_insights}}\n\
    Worth remembering:\n{{unique_insights}}",
    "## Conversation\n{{conversation_transcript}}",
    "Think first if you need to, then put only the reply text between <final_answer> and </final_answer>.",
];

/// Unprompted post sections.
const POST_SECTIONS: &[&str] = &[
    "{{base_personality}}",
    "## What you know\n{{subject_summary}} {{token_data}}",
    "## Your recent posts\n{{conversation_transcript}}",
    "You are {{agent_name}} (@{{agent_handle}}). Write one new standalone post for X. \
    It must fit in 280 characters, must not repeat your recent posts, and should sound like you. \
    No hashtags, no quotation marks around the post.",
    "Put only the post text between <tweet> and </tweet>.",
];

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("no answer found in model output")]
    NoAnswerFound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposerSettings {
    pub reply_temperature: f32,
    pub post_temperature: f32,
    pub max_tokens: u32,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self { reply_temperature: 0.7, post_temperature: 0.3, max_tokens: 1024 }
    }
}

/// Turns an enriched conversation state into a publishable response.
pub struct ResponseComposer {
    llm: Arc<dyn LlmProvider>,
    identity: AgentIdentity,
    settings: ComposerSettings,
    tools: Vec<ToolDefinition>,
}

impl ResponseComposer {
    pub fn new(llm: Arc<dyn LlmProvider>, identity: AgentIdentity, settings: ComposerSettings) -> Self {
        Self { llm, identity, settings, tools: Vec::new() }
    }

    /// Tool definitions forwarded with reply requests.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub async fn compose_reply(
        &self,
        state: &ConversationState,
        event: &InboundEvent,
    ) -> Result<ComposedResponse, ComposeError> {
        let system = PromptBuilder::new().sections(REPLY_SECTIONS.iter().copied()).render(state);
        let user = format!("@{}: {}", event.author_handle, event.text);
        let request = CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            tier: ModelTier::Default,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.reply_temperature,
            tools: self.tools.clone(),
        };
        let text = self.complete(request, FINAL_ANSWER).await?;

        let shape = ReplyShape {
            author_handle: self.identity.handle.clone(),
            author_name: self.identity.name.clone(),
            conversation_id: event.conversation_id.clone(),
            in_reply_to: Some(event.id.clone()),
        };
        self.build(text, stable_id(&event.conversation_id), shape).await
    }

    pub async fn compose_post(&self, state: &ConversationState) -> Result<ComposedResponse, ComposeError> {
        let system = PromptBuilder::new().sections(POST_SECTIONS.iter().copied()).render(state);
        let request = CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user("Write the post.")],
            tier: ModelTier::Advanced,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.post_temperature,
            tools: vec![],
        };
        let text = self.complete(request, TWEET).await?;

        let shape = ReplyShape {
            author_handle: self.identity.handle.clone(),
            author_name: self.identity.name.clone(),
            conversation_id: self.identity.session_id.to_string(),
            in_reply_to: None,
        };
        self.build(text, self.identity.session_id, shape).await
    }

    async fn complete(&self, request: CompletionRequest, markers: AnswerMarkers) -> Result<String, ComposeError> {
        let response = self.llm.complete(request).await?;
        match extract_answer(&response.content, markers) {
            Some(answer) => Ok(answer.to_owned()),
            None => {
                tracing::debug!(marker = markers.open, output_len = response.content.len(), "answer marker missing");
                Err(ComposeError::NoAnswerFound)
            }
        }
    }

    async fn build(&self, text: String, session_id: Uuid, shape: ReplyShape) -> Result<ComposedResponse, ComposeError> {
        let embedding = self.llm.embed(&text).await?;
        let fragment = Fragment {
            id: Uuid::new_v4(),
            external_id: None,
            actor_id: self.identity.actor_id,
            session_id,
            content: text,
            embedding,
            metadata: to_metadata(&shape),
            created_at: Utc::now(),
        };
        Ok(ComposedResponse {
            fragment,
            conversation_id: shape.conversation_id,
            in_reply_to: shape.in_reply_to,
        })
    }
}
