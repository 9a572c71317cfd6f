use serde_json::Value;
use std::sync::Arc;

use super::{Manager, ManagerError, ManagerId};
use crate::platform::PlatformClient;
use crate::store::Store;
use crate::types::{ComposedResponse, ConversationState, Fragment};

/// Manager-data key holding the rendered conversation transcript.
pub const CONVERSATION_TRANSCRIPT: &str = "conversation_transcript";
/// Metadata key recording the platform id of a published message.
pub const POSTED_ID: &str = "posted_id";

/// Publishes responses to the platform and supplies the conversation so far.
pub struct PostingManager {
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn Store>,
    transcript_limit: usize,
}

impl PostingManager {
    pub fn new(platform: Arc<dyn PlatformClient>, store: Arc<dyn Store>, transcript_limit: usize) -> Self {
        Self { platform, store, transcript_limit }
    }
}

/// One line per fragment, oldest first. The fragment being answered is
/// marked with an arrow.
pub fn render_transcript(fragments: &[Fragment], current: &Fragment) -> String {
    fragments
        .iter()
        .filter(|f| !f.content.is_empty())
        .map(|f| {
            let author = f.metadata_str("author_handle").unwrap_or("unknown");
            let marker = if f.id == current.id { "→ " } else { "" };
            format!("{marker}@{author}: {}", f.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait::async_trait]
impl Manager for PostingManager {
    fn id(&self) -> ManagerId {
        ManagerId::Posting
    }

    async fn post_process(
        &self,
        response: &mut ComposedResponse,
        _state: &mut ConversationState,
    ) -> Result<(), ManagerError> {
        let posted = self.platform.post(response.text(), response.in_reply_to.as_deref()).await?;
        response.fragment.metadata.insert(POSTED_ID.to_owned(), Value::String(posted.clone()));
        response.fragment.external_id = Some(posted);
        Ok(())
    }

    async fn context(&self, state: &ConversationState) -> Result<Vec<(String, Value)>, ManagerError> {
        let recent = self
            .store
            .recent_fragments(state.input.session_id, self.transcript_limit)
            .await?;
        let transcript = render_transcript(&recent, &state.input);
        Ok(vec![(CONVERSATION_TRANSCRIPT.to_owned(), Value::String(transcript))])
    }
}
