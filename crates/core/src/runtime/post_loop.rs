use tokio_util::sync::CancellationToken;

use super::interval::{IntervalScheduler, Wake};
use crate::pipeline::{OutboundPipeline, PipelineError};
use crate::types::ComposedResponse;

/// Outbound loop: compose and publish an unprompted post, wait, repeat.
pub struct PostLoop {
    pipeline: OutboundPipeline,
    scheduler: IntervalScheduler,
    cycles: u64,
}

impl PostLoop {
    pub fn new(pipeline: OutboundPipeline, scheduler: IntervalScheduler) -> Self {
        Self { pipeline, scheduler, cycles: 0 }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub async fn run_cycle(&mut self) -> Result<ComposedResponse, PipelineError> {
        self.cycles += 1;
        self.pipeline.run_once().await
    }

    /// Run until `token` is cancelled. The first post goes out immediately.
    pub async fn run(mut self, token: CancellationToken) {
        tracing::info!("post loop started");
        loop {
            if token.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                Ok(post) => tracing::info!(
                    cycle = self.cycles,
                    chars = post.text().chars().count(),
                    "post published"
                ),
                Err(e) => tracing::warn!(cycle = self.cycles, error = %e, "post cycle failed"),
            }

            let (_, wake) = self.scheduler.wait(&token).await;
            if wake == Wake::Cancelled {
                break;
            }
        }
        tracing::info!(cycles = self.cycles, "post loop stopped");
    }
}
