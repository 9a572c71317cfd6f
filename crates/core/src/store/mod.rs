//! Persistence seam: conversation/actor registry and the fragment index.
//!
//! The pipeline asks the store whether an external event was already turned
//! into a fragment, registers conversations and actors, and persists
//! fragments and the insights extracted from them. Implementations must be
//! callable from both loops concurrently.

mod memory;
mod pg;

pub use memory::{ActorRecord, MemoryStore};
pub use pg::PgStore;

use crate::types::{Fragment, Insight, InsightScope};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// True when a fragment built from `external_id` has been stored.
    async fn fragment_exists(&self, external_id: &str) -> Result<bool, StoreError>;

    /// Register a conversation. Idempotent.
    async fn upsert_conversation(&self, id: Uuid) -> Result<(), StoreError>;

    /// Register a participant. Idempotent; later calls refresh the handle.
    async fn upsert_actor(&self, id: Uuid, handle: &str, is_agent: bool) -> Result<(), StoreError>;

    /// Persist a fragment. Storing the same fragment id twice is a no-op.
    async fn store_fragment(&self, fragment: &Fragment) -> Result<(), StoreError>;

    /// Most recent fragments of a session, oldest first.
    async fn recent_fragments(&self, session_id: Uuid, limit: usize) -> Result<Vec<Fragment>, StoreError>;

    /// Persist an insight. Storing the same insight id twice is a no-op.
    async fn store_insight(&self, insight: &Insight) -> Result<(), StoreError>;

    /// Most recent insights of `scope` about `subject_id`, oldest first.
    async fn insights(
        &self,
        scope: InsightScope,
        subject_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Insight>, StoreError>;
}
