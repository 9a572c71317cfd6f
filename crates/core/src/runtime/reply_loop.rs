use chrono::Utc;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use super::interval::{IntervalScheduler, Wake};
use crate::pipeline::{BatchReport, InboundPipeline, PipelineError};
use crate::platform::TweetIngestor;

/// Inbound loop: fetch replies, answer a few, wait, repeat.
pub struct ReplyLoop {
    ingestor: TweetIngestor,
    pipeline: InboundPipeline,
    scheduler: IntervalScheduler,
    rng: StdRng,
    handle: String,
    search_limit: usize,
    cycles: u64,
}

impl ReplyLoop {
    pub fn new(
        ingestor: TweetIngestor,
        pipeline: InboundPipeline,
        scheduler: IntervalScheduler,
        rng: StdRng,
        handle: impl Into<String>,
        search_limit: usize,
    ) -> Self {
        Self {
            ingestor,
            pipeline,
            scheduler,
            rng,
            handle: handle.into(),
            search_limit,
            cycles: 0,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One fetch-and-reply cycle.
    pub async fn run_cycle(&mut self, token: &CancellationToken) -> Result<BatchReport, PipelineError> {
        self.cycles += 1;
        let events = self
            .ingestor
            .fetch(&self.handle, self.search_limit, Utc::now(), &mut self.rng)
            .await?;
        self.pipeline.run_batch(&events, &mut self.rng, token).await
    }

    /// Run until `token` is cancelled. The first cycle starts immediately.
    pub async fn run(mut self, token: CancellationToken) {
        tracing::info!(handle = %self.handle, "reply loop started");
        loop {
            if token.is_cancelled() {
                break;
            }

            match self.run_cycle(&token).await {
                Ok(report) => tracing::info!(
                    cycle = self.cycles,
                    published = report.published,
                    skipped = report.skipped,
                    duplicates = report.duplicates,
                    failed = report.failed,
                    "reply cycle complete"
                ),
                Err(PipelineError::Cancelled) => break,
                Err(e) => tracing::warn!(cycle = self.cycles, error = %e, "reply cycle failed"),
            }

            let (_, wake) = self.scheduler.wait(&token).await;
            if wake == Wake::Cancelled {
                break;
            }
        }
        tracing::info!(cycles = self.cycles, "reply loop stopped");
    }
}
