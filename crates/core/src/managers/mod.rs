//! Pluggable capability units and the engine that runs them in order.
//!
//! A manager may enrich the conversation state before composition
//! (`process`), contribute named context values (`context`) and act on the
//! final response (`post_process`). The engine runs the registered managers
//! in registration order, restricted by a [`ManagerFilter`].

pub mod guardrails;
pub mod insight;
pub mod personality;
pub mod posting;
pub mod subject;

pub use guardrails::GuardrailsManager;
pub use insight::InsightManager;
pub use personality::{Persona, PersonalityManager};
pub use posting::PostingManager;
pub use subject::{CachedMarketData, DexScreenerSource, MarketDataError, MarketDataSource, SubjectManager};

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::platform::PlatformError;
use crate::store::{Store, StoreError};
use crate::types::{ComposedResponse, ConversationState};
use hana_llm::provider::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerId {
    Guardrails,
    Insight,
    Personality,
    Subject,
    Posting,
}

impl ManagerId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guardrails => "guardrails",
            Self::Insight => "insight",
            Self::Personality => "personality",
            Self::Subject => "subject",
            Self::Posting => "posting",
        }
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid manager output: {0}")]
    InvalidOutput(String),
}

#[async_trait::async_trait]
pub trait Manager: Send + Sync {
    fn id(&self) -> ManagerId;

    async fn process(&self, _state: &mut ConversationState) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Act on the composed response. May annotate the response fragment
    /// before the engine persists it.
    async fn post_process(
        &self,
        _response: &mut ComposedResponse,
        _state: &mut ConversationState,
    ) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Named values made available to prompt templates.
    async fn context(&self, _state: &ConversationState) -> Result<Vec<(String, Value)>, ManagerError> {
        Ok(Vec::new())
    }
}

/// Model output with an optional markdown code fence removed.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim()
}

/// Which registered managers take part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerFilter {
    All,
    Only(&'static [ManagerId]),
    Except(&'static [ManagerId]),
}

impl ManagerFilter {
    pub fn admits(&self, id: ManagerId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&id),
            Self::Except(ids) => !ids.contains(&id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub filter: ManagerFilter,
    /// Persist the input fragment after the managers ran.
    pub store: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("manager {manager} failed: {source}")]
    Manager {
        manager: ManagerId,
        #[source]
        source: ManagerError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Ordered manager registry plus the store the engine persists through.
pub struct Engine {
    store: Arc<dyn Store>,
    managers: Vec<Arc<dyn Manager>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, managers: Vec::new() }
    }

    /// Register a manager. Order of registration is order of execution.
    pub fn register(mut self, manager: Arc<dyn Manager>) -> Self {
        self.managers.push(manager);
        self
    }

    pub fn manager_ids(&self) -> Vec<ManagerId> {
        self.managers.iter().map(|m| m.id()).collect()
    }

    fn selected(&self, filter: ManagerFilter) -> impl Iterator<Item = &Arc<dyn Manager>> {
        self.managers.iter().filter(move |m| filter.admits(m.id()))
    }

    /// Run `process` on every admitted manager, optionally persist the input
    /// fragment, then gather the admitted managers' context into the state.
    pub async fn process(&self, state: &mut ConversationState, opts: ProcessOptions) -> Result<(), EngineError> {
        for manager in self.selected(opts.filter) {
            manager
                .process(state)
                .await
                .map_err(|source| EngineError::Manager { manager: manager.id(), source })?;
        }

        if opts.store && !state.is_seed() {
            self.store.store_fragment(&state.input).await?;
        }

        for manager in self.selected(opts.filter) {
            let entries = manager
                .context(state)
                .await
                .map_err(|source| EngineError::Manager { manager: manager.id(), source })?;
            for (key, value) in entries {
                state.set_manager_data(key, value);
            }
        }
        Ok(())
    }

    /// Run `post_process` on every admitted manager, then persist the
    /// response fragment.
    pub async fn post_process(
        &self,
        response: &mut ComposedResponse,
        state: &mut ConversationState,
        filter: ManagerFilter,
    ) -> Result<(), EngineError> {
        for manager in self.selected(filter) {
            manager
                .post_process(response, state)
                .await
                .map_err(|source| EngineError::Manager { manager: manager.id(), source })?;
        }
        self.store.store_fragment(&response.fragment).await?;
        Ok(())
    }
}
