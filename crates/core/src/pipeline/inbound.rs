use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{GuardrailGate, PipelineError, PublishDispatcher};
use crate::compose::ResponseComposer;
use crate::managers::{Engine, ManagerFilter, ManagerId, ProcessOptions};
use crate::runtime::interval::{Wake, jitter_below, sleep_or_cancel};
use crate::store::Store;
use crate::types::{
    AGENT_HANDLE, AGENT_NAME, AgentIdentity, ComposedResponse, ConversationState, Fragment,
    InboundEvent, stable_id,
};
use hana_llm::provider::LlmProvider;

/// Enrichment for replies: everything but guardrails, which the gate already ran.
const ENRICH_REPLY: ProcessOptions = ProcessOptions {
    filter: ManagerFilter::Except(&[ManagerId::Guardrails]),
    store: true,
};

#[derive(Debug)]
pub enum EventOutcome {
    Published(ComposedResponse),
    SkippedOwn,
    SkippedStale,
}

/// Tally of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub published: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct InboundSettings {
    pub recency: Duration,
    /// Exclusive ceiling of the pause between events.
    pub delay_max: Duration,
}

/// Per-event reply pipeline: filter, register, dedup, embed, gate, enrich,
/// compose, publish.
pub struct InboundPipeline {
    identity: AgentIdentity,
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmProvider>,
    engine: Arc<Engine>,
    gate: GuardrailGate,
    composer: Arc<ResponseComposer>,
    dispatcher: PublishDispatcher,
    settings: InboundSettings,
}

impl InboundPipeline {
    pub fn new(
        identity: AgentIdentity,
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmProvider>,
        engine: Arc<Engine>,
        composer: Arc<ResponseComposer>,
        settings: InboundSettings,
    ) -> Self {
        Self {
            identity,
            store,
            llm,
            gate: GuardrailGate::new(engine.clone()),
            dispatcher: PublishDispatcher::new(engine.clone()),
            engine,
            composer,
            settings,
        }
    }

    pub async fn process_event(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, PipelineError> {
        if event.is_authored_by(&self.identity.handle) {
            return Ok(EventOutcome::SkippedOwn);
        }
        if !event.is_recent(now, self.settings.recency) {
            return Ok(EventOutcome::SkippedStale);
        }

        self.store.upsert_conversation(stable_id(&event.conversation_id)).await?;
        let is_agent = self.identity.owns_handle(&event.author_handle);
        self.store
            .upsert_actor(stable_id(&event.author_id), &event.author_handle, is_agent)
            .await?;

        match self.store.fragment_exists(&event.id).await {
            Ok(false) => {}
            Ok(true) => return Err(PipelineError::FragmentExists(event.id.clone())),
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "dedup recheck failed, treating as processed");
                return Err(PipelineError::FragmentExists(event.id.clone()));
            }
        }

        let embedding = self.llm.embed(&event.text).await?;
        let mut state = ConversationState::new(Fragment::from_event(event, embedding));

        self.gate.check(&state).await?;
        self.engine.process(&mut state, ENRICH_REPLY).await?;

        state.add_custom_data(AGENT_HANDLE, self.identity.handle.clone());
        state.add_custom_data(AGENT_NAME, self.identity.name.clone());

        let response = self.composer.compose_reply(&state, event).await?;
        let published = self.dispatcher.dispatch_reply(response, &mut state).await?;
        Ok(EventOutcome::Published(published))
    }

    /// Process events one at a time with a random pause after each
    /// published or failed event. Only cancellation ends the batch early.
    pub async fn run_batch<R: Rng + ?Sized>(
        &self,
        events: &[InboundEvent],
        rng: &mut R,
        token: &CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::default();
        for event in events {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            match self.process_event(event, Utc::now()).await {
                Ok(EventOutcome::Published(response)) => {
                    tracing::info!(event_id = %event.id, chars = response.text().chars().count(), "reply published");
                    report.published += 1;
                }
                Ok(outcome) => {
                    tracing::debug!(event_id = %event.id, ?outcome, "event skipped");
                    report.skipped += 1;
                    continue;
                }
                Err(e) if e.is_duplicate() => {
                    tracing::debug!(event_id = %event.id, "event already processed");
                    report.duplicates += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "event failed");
                    report.failed += 1;
                }
            }

            let delay = jitter_below(self.settings.delay_max, rng);
            if sleep_or_cancel(delay, token).await == Wake::Cancelled {
                return Err(PipelineError::Cancelled);
            }
        }
        Ok(report)
    }
}
