use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::interval::{IntervalScheduler, seeded_rng};
use super::post_loop::PostLoop;
use super::reply_loop::ReplyLoop;
use crate::compose::{ComposerSettings, ResponseComposer};
use crate::config::{ConfigError, HanaCfg};
use crate::managers::{Engine, Manager, ManagerId};
use crate::pipeline::{InboundPipeline, InboundSettings, OutboundPipeline};
use crate::platform::{PlatformClient, TweetIngestor};
use crate::store::{Store, StoreError};
use crate::types::AgentIdentity;
use hana_llm::provider::{LlmProvider, ToolDefinition};

// Independent RNG streams per consumer.
const STREAM_REPLY_SCHEDULE: u64 = 1;
const STREAM_REPLY_SAMPLING: u64 = 2;
const STREAM_POST_SCHEDULE: u64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("orchestrator needs a {0}")]
    Missing(&'static str),
    #[error("no {0} manager registered")]
    MissingManager(ManagerId),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Owns both control loops and the token that stops them.
pub struct Orchestrator {
    identity: AgentIdentity,
    store: Arc<dyn Store>,
    reply_loop: ReplyLoop,
    post_loop: PostLoop,
    token: CancellationToken,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Record the agent itself in the actor registry so that its response
    /// fragments point at a known actor.
    pub async fn register_agent(&self) -> Result<(), StoreError> {
        self.store
            .upsert_actor(self.identity.actor_id, &self.identity.handle, true)
            .await
    }

    /// Register the agent, then spawn the reply and post loops and wait
    /// until both have stopped.
    pub async fn run(self) {
        if let Err(e) = self.register_agent().await {
            tracing::warn!(error = %e, "failed to register agent actor");
        }

        let reply = tokio::spawn(self.reply_loop.run(self.token.clone()));
        let post = tokio::spawn(self.post_loop.run(self.token.clone()));
        tracing::info!("orchestrator running");

        let (reply, post) = tokio::join!(reply, post);
        for (name, result) in [("reply", reply), ("post", post)] {
            if let Err(e) = result {
                tracing::error!(task = name, error = %e, "loop task aborted");
            }
        }
        tracing::info!("orchestrator stopped");
    }
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    cfg: HanaCfg,
    store: Option<Arc<dyn Store>>,
    llm: Option<Arc<dyn LlmProvider>>,
    platform: Option<Arc<dyn PlatformClient>>,
    managers: Vec<Arc<dyn Manager>>,
    tools: Vec<ToolDefinition>,
    token: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, cfg: HanaCfg) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn platform(mut self, platform: Arc<dyn PlatformClient>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Register a manager. Managers run in registration order.
    pub fn manager(mut self, manager: Arc<dyn Manager>) -> Self {
        self.managers.push(manager);
        self
    }

    /// Tool definitions forwarded with every reply completion.
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.cfg.validate()?;
        let store = self.store.ok_or(BuildError::Missing("store"))?;
        let llm = self.llm.ok_or(BuildError::Missing("language model"))?;
        let platform = self.platform.ok_or(BuildError::Missing("platform client"))?;
        for required in [ManagerId::Guardrails, ManagerId::Posting] {
            if !self.managers.iter().any(|m| m.id() == required) {
                return Err(BuildError::MissingManager(required));
            }
        }

        let cfg = self.cfg;
        let identity = AgentIdentity::new(cfg.agent_name.clone(), cfg.agent_handle.clone());
        let engine = Arc::new(self.managers.into_iter().fold(Engine::new(store.clone()), Engine::register));
        let settings = ComposerSettings {
            reply_temperature: cfg.reply_temperature,
            post_temperature: cfg.post_temperature,
            max_tokens: cfg.completion_max_tokens,
        };
        let composer = Arc::new(ResponseComposer::new(llm.clone(), identity.clone(), settings).with_tools(self.tools));

        let ingestor = TweetIngestor::new(platform, store.clone(), cfg.recency_threshold(), cfg.max_replies_per_cycle);
        let inbound = InboundPipeline::new(
            identity.clone(),
            store.clone(),
            llm,
            engine.clone(),
            composer.clone(),
            InboundSettings {
                recency: cfg.recency_threshold(),
                delay_max: cfg.inter_event_delay_max(),
            },
        );
        let reply_loop = ReplyLoop::new(
            ingestor,
            inbound,
            IntervalScheduler::new(cfg.monitor_window()?, seeded_rng(cfg.rng_seed, STREAM_REPLY_SCHEDULE)),
            seeded_rng(cfg.rng_seed, STREAM_REPLY_SAMPLING),
            cfg.agent_handle.clone(),
            cfg.reply_search_limit,
        );

        let outbound = OutboundPipeline::new(identity.clone(), engine, composer);
        let post_loop = PostLoop::new(
            outbound,
            IntervalScheduler::new(cfg.post_window()?, seeded_rng(cfg.rng_seed, STREAM_POST_SCHEDULE)),
        );

        Ok(Orchestrator {
            identity,
            store,
            reply_loop,
            post_loop,
            token: self.token.unwrap_or_default(),
        })
    }
}
