use std::sync::Arc;

use super::PipelineError;
use crate::managers::{Engine, ManagerFilter, ManagerId};
use crate::types::{ComposedResponse, ConversationState};

pub const REPLY_DISPATCH: ManagerFilter = ManagerFilter::Only(&[ManagerId::Posting]);
pub const POST_DISPATCH: ManagerFilter = ManagerFilter::Only(&[ManagerId::Posting, ManagerId::Personality]);

/// Hands composed responses to the engine's post-process pass. No retries.
pub struct PublishDispatcher {
    engine: Arc<Engine>,
}

impl PublishDispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn dispatch_reply(
        &self,
        response: ComposedResponse,
        state: &mut ConversationState,
    ) -> Result<ComposedResponse, PipelineError> {
        self.dispatch(response, state, REPLY_DISPATCH).await
    }

    pub async fn dispatch_post(
        &self,
        response: ComposedResponse,
        state: &mut ConversationState,
    ) -> Result<ComposedResponse, PipelineError> {
        self.dispatch(response, state, POST_DISPATCH).await
    }

    async fn dispatch(
        &self,
        mut response: ComposedResponse,
        state: &mut ConversationState,
        filter: ManagerFilter,
    ) -> Result<ComposedResponse, PipelineError> {
        self.engine.post_process(&mut response, state, filter).await?;
        Ok(response)
    }
}
