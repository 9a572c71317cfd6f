//! Social-platform seam: fetch replies, parse them, publish messages.

mod http;
pub mod ingest;

pub use http::XClient;
pub use ingest::TweetIngestor;

use crate::types::InboundEvent;

/// Unparsed search response, exactly as the platform returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTimeline(pub serde_json::Value);

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("platform returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("malformed timeline: {0}")]
    Parse(String),
}

#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    /// Up to `limit` recent replies addressed to `handle`.
    async fn search_replies(&self, handle: &str, limit: usize) -> Result<RawTimeline, PlatformError>;

    fn parse_timeline(&self, raw: &RawTimeline) -> Result<Vec<InboundEvent>, PlatformError>;

    /// Publish `text`, threaded under `in_reply_to` when given. Returns the new message id.
    async fn post(&self, text: &str, in_reply_to: Option<&str>) -> Result<String, PlatformError>;
}
