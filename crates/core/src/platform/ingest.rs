use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

use super::{PlatformClient, PlatformError};
use crate::store::Store;
use crate::types::InboundEvent;

/// Fetches candidate replies and narrows them to a small random batch of
/// recent, not-yet-processed events.
pub struct TweetIngestor {
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn Store>,
    recency: Duration,
    max_batch: usize,
}

impl TweetIngestor {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn Store>,
        recency: Duration,
        max_batch: usize,
    ) -> Self {
        Self { platform, store, recency, max_batch }
    }

    /// Fetch, filter and sample. At most `limit` fetched events are
    /// considered even when the platform returns more. A fetch or parse
    /// failure fails the whole call; nothing partial is returned.
    pub async fn fetch<R: Rng + ?Sized>(
        &self,
        handle: &str,
        limit: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<InboundEvent>, PlatformError> {
        let raw = self.platform.search_replies(handle, limit).await?;
        let mut events = self.platform.parse_timeline(&raw)?;
        events.truncate(limit);
        let fetched = events.len();

        let mut fresh = Vec::with_capacity(fetched);
        for event in events {
            if !event.is_recent(now, self.recency) {
                continue;
            }
            match self.store.fragment_exists(&event.id).await {
                Ok(false) => fresh.push(event),
                Ok(true) => {}
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "dedup lookup failed, skipping event");
                }
            }
        }

        let selected = sample(fresh, self.max_batch, rng);
        tracing::info!(fetched, selected = selected.len(), "replies ingested");
        Ok(selected)
    }
}

/// Shuffle, then keep a uniformly drawn count in `[1, min(max_batch, len)]`.
/// Empty input stays empty.
pub fn sample<T, R: Rng + ?Sized>(mut items: Vec<T>, max_batch: usize, rng: &mut R) -> Vec<T> {
    if items.is_empty() {
        return items;
    }
    items.shuffle(rng);
    let upper = max_batch.max(1).min(items.len());
    let keep = rng.random_range(1..=upper);
    items.truncate(keep);
    items
}
