//! Shared fixtures: a scripted platform and a fully wired pipeline over
//! in-memory collaborators.

#![allow(dead_code)]

use chrono::{TimeDelta, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hana_core::compose::{ComposerSettings, ResponseComposer};
use hana_core::managers::{
    Engine, GuardrailsManager, InsightManager, Persona, PersonalityManager, PostingManager,
    SubjectManager,
};
use hana_core::pipeline::{InboundPipeline, InboundSettings, OutboundPipeline};
use hana_core::platform::{PlatformClient, PlatformError, RawTimeline};
use hana_core::store::{MemoryStore, Store, StoreError};
use hana_core::types::{AgentIdentity, Fragment, InboundEvent, Insight, InsightScope};
use hana_llm::provider::MockProvider;

pub const HANDLE: &str = "hana_bot";
pub const ALLOW: &str = r#"{"allowed": true, "reasons": []}"#;
pub const DENY: &str = r#"{"allowed": false, "reasons": ["SEXISM", "HINTING"]}"#;
pub const INSIGHTS: &str = r#"{"session": ["thread asks about chart reading"], "actor": [], "unique": []}"#;

/// Platform that serves a fixed timeline and records every post.
#[derive(Default)]
pub struct ScriptedPlatform {
    pub events: Mutex<Vec<InboundEvent>>,
    pub posts: Mutex<Vec<(String, Option<String>)>>,
    pub fetches: AtomicUsize,
    pub fail_fetch: bool,
    /// Cancelled right after the first post goes out.
    pub cancel_on_post: Option<CancellationToken>,
}

impl ScriptedPlatform {
    pub fn with_events(events: Vec<InboundEvent>) -> Self {
        Self { events: Mutex::new(events), ..Self::default() }
    }

    pub fn failing() -> Self {
        Self { fail_fetch: true, ..Self::default() }
    }

    pub fn cancelling(token: CancellationToken) -> Self {
        Self { cancel_on_post: Some(token), ..Self::default() }
    }

    pub fn posts(&self) -> Vec<(String, Option<String>)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PlatformClient for ScriptedPlatform {
    async fn search_replies(&self, _handle: &str, _limit: usize) -> Result<RawTimeline, PlatformError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch {
            return Err(PlatformError::Api { status: 503, body: "over capacity".into() });
        }
        Ok(RawTimeline(serde_json::Value::Null))
    }

    fn parse_timeline(&self, _raw: &RawTimeline) -> Result<Vec<InboundEvent>, PlatformError> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn post(&self, text: &str, in_reply_to: Option<&str>) -> Result<String, PlatformError> {
        let mut posts = self.posts.lock().unwrap();
        posts.push((text.to_owned(), in_reply_to.map(str::to_owned)));
        if let Some(token) = &self.cancel_on_post {
            token.cancel();
        }
        Ok(format!("posted-{}", posts.len()))
    }
}

/// Memory store whose dedup lookup always fails.
#[derive(Default)]
pub struct UnreachableIndex {
    pub inner: MemoryStore,
}

#[async_trait::async_trait]
impl Store for UnreachableIndex {
    async fn fragment_exists(&self, _external_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("index timed out".into()))
    }
    async fn upsert_conversation(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.upsert_conversation(id).await
    }
    async fn upsert_actor(&self, id: Uuid, handle: &str, is_agent: bool) -> Result<(), StoreError> {
        self.inner.upsert_actor(id, handle, is_agent).await
    }
    async fn store_fragment(&self, fragment: &Fragment) -> Result<(), StoreError> {
        self.inner.store_fragment(fragment).await
    }
    async fn recent_fragments(&self, session_id: Uuid, limit: usize) -> Result<Vec<Fragment>, StoreError> {
        self.inner.recent_fragments(session_id, limit).await
    }
    async fn store_insight(&self, insight: &Insight) -> Result<(), StoreError> {
        self.inner.store_insight(insight).await
    }
    async fn insights(
        &self,
        scope: InsightScope,
        subject_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Insight>, StoreError> {
        self.inner.insights(scope, subject_id, limit).await
    }
}

pub fn event(id: &str, handle: &str, text: &str, minutes_ago: i64) -> InboundEvent {
    InboundEvent {
        id: id.into(),
        conversation_id: format!("thread-{id}"),
        author_id: format!("user-{handle}"),
        author_handle: handle.into(),
        author_name: handle.to_uppercase(),
        text: text.into(),
        created_at: Utc::now() - TimeDelta::minutes(minutes_ago),
        in_reply_to: Some(format!("parent-{id}")),
    }
}

pub fn identity() -> AgentIdentity {
    AgentIdentity::new("hana", HANDLE)
}

/// Everything a pipeline test inspects afterwards.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub platform: Arc<ScriptedPlatform>,
    /// Model behind the guardrails manager.
    pub guard: Arc<MockProvider>,
    /// Model behind insight extraction.
    pub insight: Arc<MockProvider>,
    /// Model behind composition and embeddings.
    pub llm: Arc<MockProvider>,
    pub engine: Arc<Engine>,
    pub composer: Arc<ResponseComposer>,
}

impl Harness {
    pub fn new(verdict: &str, answer: &str, platform: ScriptedPlatform) -> Self {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(platform);
        let guard = Arc::new(MockProvider::new(verdict));
        let llm = Arc::new(MockProvider::new(answer));
        let insight = Arc::new(MockProvider::new(INSIGHTS));

        let engine = Engine::new(store.clone())
            .register(Arc::new(GuardrailsManager::new(guard.clone())))
            .register(Arc::new(InsightManager::new(insight.clone(), store.clone(), 5)))
            .register(Arc::new(PersonalityManager::new(Persona::named("Hana"))))
            .register(Arc::new(SubjectManager::new("on-chain markets")))
            .register(Arc::new(PostingManager::new(platform.clone(), store.clone(), 20)));
        let composer = Arc::new(ResponseComposer::new(llm.clone(), identity(), ComposerSettings::default()));

        Self { store, platform, guard, insight, llm, engine: Arc::new(engine), composer }
    }

    pub fn inbound(&self) -> InboundPipeline {
        self.inbound_with(self.store.clone())
    }

    /// Reply pipeline whose dedup checks go to `store`.
    pub fn inbound_with(&self, store: Arc<dyn Store>) -> InboundPipeline {
        InboundPipeline::new(
            identity(),
            store,
            self.llm.clone(),
            self.engine.clone(),
            self.composer.clone(),
            InboundSettings {
                recency: Duration::from_secs(24 * 3600),
                delay_max: Duration::from_secs(30),
            },
        )
    }

    pub fn outbound(&self) -> OutboundPipeline {
        OutboundPipeline::new(identity(), self.engine.clone(), self.composer.clone())
    }
}
