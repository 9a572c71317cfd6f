use std::sync::Arc;

use super::{PipelineError, PublishDispatcher};
use crate::compose::ResponseComposer;
use crate::managers::{Engine, ManagerFilter, ManagerId, ProcessOptions};
use crate::types::{AGENT_HANDLE, AGENT_NAME, AgentIdentity, ComposedResponse, ConversationState, Fragment};

const ENRICH_POST: ProcessOptions = ProcessOptions {
    filter: ManagerFilter::Only(&[ManagerId::Personality, ManagerId::Subject, ManagerId::Posting]),
    store: false,
};

/// Unprompted post: seed state, enrich, compose, publish.
pub struct OutboundPipeline {
    identity: AgentIdentity,
    engine: Arc<Engine>,
    composer: Arc<ResponseComposer>,
    dispatcher: PublishDispatcher,
}

impl OutboundPipeline {
    pub fn new(identity: AgentIdentity, engine: Arc<Engine>, composer: Arc<ResponseComposer>) -> Self {
        Self {
            identity,
            dispatcher: PublishDispatcher::new(engine.clone()),
            engine,
            composer,
        }
    }

    pub async fn run_once(&self) -> Result<ComposedResponse, PipelineError> {
        let mut state = ConversationState::new(Fragment::seed(&self.identity));
        self.engine.process(&mut state, ENRICH_POST).await?;

        state.add_custom_data(AGENT_HANDLE, self.identity.handle.clone());
        state.add_custom_data(AGENT_NAME, self.identity.name.clone());

        let response = self.composer.compose_post(&state).await?;
        self.dispatcher.dispatch_post(response, &mut state).await
    }
}
