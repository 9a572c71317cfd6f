use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::types::{Fragment, Insight, InsightScope};

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn fragment_exists(&self, external_id: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM fragments WHERE external_id = $1)")
                .bind(external_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn upsert_conversation(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO conversations (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_actor(&self, id: Uuid, handle: &str, is_agent: bool) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO actors (id, handle, is_agent) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET handle = EXCLUDED.handle, \
             is_agent = EXCLUDED.is_agent, updated_at = now()",
        )
        .bind(id)
        .bind(handle)
        .bind(is_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_fragment(&self, fragment: &Fragment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO fragments \
             (id, external_id, actor_id, session_id, content, embedding, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO NOTHING",
        )
        .bind(fragment.id)
        .bind(&fragment.external_id)
        .bind(fragment.actor_id)
        .bind(fragment.session_id)
        .bind(&fragment.content)
        .bind(&fragment.embedding)
        .bind(Value::Object(fragment.metadata.clone()))
        .bind(fragment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_fragments(&self, session_id: Uuid, limit: usize) -> Result<Vec<Fragment>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, FragmentRow>(
            "SELECT id, external_id, actor_id, session_id, content, embedding, metadata, created_at \
             FROM fragments WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut fragments: Vec<Fragment> = rows.into_iter().map(Into::into).collect();
        fragments.reverse();
        Ok(fragments)
    }

    async fn store_insight(&self, insight: &Insight) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO insights (id, scope, subject_id, content, source_fragment, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(insight.id)
        .bind(insight.scope.as_str())
        .bind(insight.subject_id)
        .bind(&insight.content)
        .bind(insight.source_fragment)
        .bind(insight.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insights(
        &self,
        scope: InsightScope,
        subject_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Insight>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, InsightRow>(
            "SELECT id, subject_id, content, source_fragment, created_at FROM insights \
             WHERE scope = $1 AND subject_id IS NOT DISTINCT FROM $2 \
             ORDER BY created_at DESC LIMIT $3",
        )
        .bind(scope.as_str())
        .bind(subject_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|row| Insight {
                id: row.id,
                scope,
                subject_id: row.subject_id,
                content: row.content,
                source_fragment: row.source_fragment,
                created_at: row.created_at,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct InsightRow {
    id: Uuid,
    subject_id: Option<Uuid>,
    content: String,
    source_fragment: Uuid,
    created_at: DateTime<Utc>,
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct FragmentRow {
    id: Uuid,
    external_id: Option<String>,
    actor_id: Uuid,
    session_id: Uuid,
    content: String,
    embedding: Vec<f32>,
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl From<FragmentRow> for Fragment {
    fn from(row: FragmentRow) -> Self {
        let metadata = match row.metadata {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            id: row.id,
            external_id: row.external_id,
            actor_id: row.actor_id,
            session_id: row.session_id,
            content: row.content,
            embedding: row.embedding,
            metadata,
            created_at: row.created_at,
        }
    }
}
