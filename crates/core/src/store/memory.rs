use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::types::{Fragment, Insight, InsightScope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorRecord {
    pub handle: String,
    pub is_agent: bool,
}

#[derive(Debug, Default)]
struct Inner {
    conversations: HashSet<Uuid>,
    actors: HashMap<Uuid, ActorRecord>,
    fragments: Vec<Fragment>,
    fragment_ids: HashSet<Uuid>,
    processed: HashSet<String>,
    insights: Vec<Insight>,
    insight_ids: HashSet<Uuid>,
}

/// In-process store used when no database is configured (ephemeral mode)
/// and throughout the tests. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    pub fn fragment_count(&self) -> usize {
        self.lock().map(|i| i.fragments.len()).unwrap_or(0)
    }

    pub fn fragments(&self) -> Vec<Fragment> {
        self.lock().map(|i| i.fragments.clone()).unwrap_or_default()
    }

    pub fn actor(&self, id: Uuid) -> Option<ActorRecord> {
        self.lock().ok().and_then(|i| i.actors.get(&id).cloned())
    }

    pub fn insight_count(&self) -> usize {
        self.lock().map(|i| i.insights.len()).unwrap_or(0)
    }

    pub fn has_conversation(&self, id: Uuid) -> bool {
        self.lock().map(|i| i.conversations.contains(&id)).unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn fragment_exists(&self, external_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.processed.contains(external_id))
    }

    async fn upsert_conversation(&self, id: Uuid) -> Result<(), StoreError> {
        self.lock()?.conversations.insert(id);
        Ok(())
    }

    async fn upsert_actor(&self, id: Uuid, handle: &str, is_agent: bool) -> Result<(), StoreError> {
        self.lock()?.actors.insert(
            id,
            ActorRecord {
                handle: handle.to_owned(),
                is_agent,
            },
        );
        Ok(())
    }

    async fn store_fragment(&self, fragment: &Fragment) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.fragment_ids.insert(fragment.id) {
            return Ok(());
        }
        if let Some(external) = &fragment.external_id {
            inner.processed.insert(external.clone());
        }
        inner.fragments.push(fragment.clone());
        Ok(())
    }

    async fn recent_fragments(&self, session_id: Uuid, limit: usize) -> Result<Vec<Fragment>, StoreError> {
        let inner = self.lock()?;
        let mut matching: Vec<Fragment> = inner
            .fragments
            .iter()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect();
        matching.sort_by_key(|f| f.created_at);
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn store_insight(&self, insight: &Insight) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.insight_ids.insert(insight.id) {
            inner.insights.push(insight.clone());
        }
        Ok(())
    }

    async fn insights(
        &self,
        scope: InsightScope,
        subject_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Insight>, StoreError> {
        let inner = self.lock()?;
        let mut matching: Vec<Insight> = inner
            .insights
            .iter()
            .filter(|i| i.scope == scope && i.subject_id == subject_id)
            .cloned()
            .collect();
        matching.sort_by_key(|i| i.created_at);
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentIdentity, InboundEvent};
    use chrono::{TimeDelta, Utc};

    fn event(id: &str, minutes_ago: i64) -> InboundEvent {
        InboundEvent {
            id: id.into(),
            conversation_id: "thread".into(),
            author_id: "u1".into(),
            author_handle: "alice".into(),
            author_name: "Alice".into(),
            text: format!("message {id}"),
            created_at: Utc::now() - TimeDelta::minutes(minutes_ago),
            in_reply_to: None,
        }
    }

    #[tokio::test]
    async fn stored_event_fragments_become_processed() {
        let store = MemoryStore::new();
        assert!(!store.fragment_exists("1").await.unwrap());
        store.store_fragment(&Fragment::from_event(&event("1", 0), vec![])).await.unwrap();
        assert!(store.fragment_exists("1").await.unwrap());
        assert!(!store.fragment_exists("2").await.unwrap());
    }

    #[tokio::test]
    async fn storing_twice_keeps_one_copy() {
        let store = MemoryStore::new();
        let f = Fragment::from_event(&event("1", 0), vec![]);
        store.store_fragment(&f).await.unwrap();
        store.store_fragment(&f).await.unwrap();
        assert_eq!(store.fragment_count(), 1);
    }

    #[tokio::test]
    async fn seed_fragments_do_not_enter_processed_index() {
        let store = MemoryStore::new();
        let agent = AgentIdentity::new("hana", "hana_bot");
        store.store_fragment(&Fragment::seed(&agent)).await.unwrap();
        assert_eq!(store.fragment_count(), 1);
        assert!(!store.fragment_exists("").await.unwrap());
    }

    #[tokio::test]
    async fn recent_fragments_are_oldest_first_and_bounded() {
        let store = MemoryStore::new();
        for (id, ago) in [("a", 30), ("b", 10), ("c", 20)] {
            store.store_fragment(&Fragment::from_event(&event(id, ago), vec![])).await.unwrap();
        }
        let session = crate::types::stable_id("thread");
        let recent = store.recent_fragments(session, 2).await.unwrap();
        let ids: Vec<_> = recent.iter().filter_map(|f| f.external_id.as_deref()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn insights_are_scoped_and_deduplicated() {
        let store = MemoryStore::new();
        let source = Fragment::from_event(&event("1", 0), vec![]);
        let session = Insight::extracted(&source, InsightScope::Session, 0, "thread about fees");
        store.store_insight(&session).await.unwrap();
        store.store_insight(&session).await.unwrap();
        store
            .store_insight(&Insight::extracted(&source, InsightScope::Unique, 0, "fees doubled"))
            .await
            .unwrap();

        assert_eq!(store.insight_count(), 2);
        let found = store.insights(InsightScope::Session, Some(source.session_id), 5).await.unwrap();
        assert_eq!(found, vec![session]);
        assert!(store.insights(InsightScope::Actor, Some(source.actor_id), 5).await.unwrap().is_empty());
        assert_eq!(store.insights(InsightScope::Unique, None, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn actor_upsert_refreshes_record() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.upsert_actor(id, "old", false).await.unwrap();
        store.upsert_actor(id, "new", true).await.unwrap();
        assert_eq!(
            store.actor(id),
            Some(ActorRecord { handle: "new".into(), is_agent: true })
        );
    }
}
