//! X (Twitter) API v2 client, bearer-token auth.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{PlatformClient, PlatformError, RawTimeline};
use crate::types::{InboundEvent, normalize_handle};

const DEFAULT_BASE_URL: &str = "https://api.twitter.com/2";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const TWEET_FIELDS: &str = "author_id,conversation_id,created_at,referenced_tweets";
// Bounds the v2 recent-search endpoint accepts for max_results.
const MIN_RESULTS: usize = 10;
const MAX_RESULTS: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ApiTweet>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    text: String,
    author_id: String,
    conversation_id: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedTweet>,
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    data: Option<PostedTweet>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct PostedTweet {
    id: String,
}

pub struct XClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl XClient {
    pub fn new(bearer_token: String, base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self {
            client,
            base_url: base.trim_end_matches('/').to_owned(),
            bearer_token,
        }
    }

    /// Reads `HANA_X_BEARER_TOKEN` (required) and `HANA_X_BASE_URL`.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("HANA_X_BEARER_TOKEN").ok()?;
        Some(Self::new(token, std::env::var("HANA_X_BASE_URL").ok()))
    }

    fn search_endpoint(&self) -> String {
        format!("{}/tweets/search/recent", self.base_url)
    }

    fn post_endpoint(&self) -> String {
        format!("{}/tweets", self.base_url)
    }
}

fn reply_query(handle: &str) -> String {
    format!("to:{} is:reply", normalize_handle(handle))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 429 {
        return Err(PlatformError::RateLimited);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PlatformError::Api { status: status.as_u16(), body })
}

fn join_errors(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(|e| if e.detail.is_empty() { e.message.as_str() } else { e.detail.as_str() })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Decode a v2 search response into events, resolving authors from `includes.users`.
fn parse_search(raw: &RawTimeline) -> Result<Vec<InboundEvent>, PlatformError> {
    let resp: SearchResponse =
        serde_json::from_value(raw.0.clone()).map_err(|e| PlatformError::Parse(e.to_string()))?;

    if resp.data.is_empty() && !resp.errors.is_empty() {
        return Err(PlatformError::Parse(join_errors(&resp.errors)));
    }

    let users: HashMap<&str, &ApiUser> =
        resp.includes.users.iter().map(|u| (u.id.as_str(), u)).collect();

    let events = resp
        .data
        .iter()
        .map(|t| {
            let author = users.get(t.author_id.as_str());
            InboundEvent {
                id: t.id.clone(),
                conversation_id: t.conversation_id.clone().unwrap_or_else(|| t.id.clone()),
                author_id: t.author_id.clone(),
                author_handle: author.map(|u| u.username.clone()).unwrap_or_default(),
                author_name: author.map(|u| u.name.clone()).unwrap_or_default(),
                text: t.text.clone(),
                created_at: t.created_at,
                in_reply_to: t
                    .referenced_tweets
                    .iter()
                    .find(|r| r.kind == "replied_to")
                    .map(|r| r.id.clone()),
            }
        })
        .collect();
    Ok(events)
}

#[async_trait::async_trait]
impl PlatformClient for XClient {
    async fn search_replies(&self, handle: &str, limit: usize) -> Result<RawTimeline, PlatformError> {
        let max_results = limit.clamp(MIN_RESULTS, MAX_RESULTS).to_string();
        let query = reply_query(handle);
        let resp = self
            .client
            .get(self.search_endpoint())
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("query", query.as_str()),
                ("max_results", max_results.as_str()),
                ("tweet.fields", TWEET_FIELDS),
                ("expansions", "author_id"),
                ("user.fields", "username,name"),
            ])
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        let resp = check_status(resp).await?;
        let body: serde_json::Value =
            resp.json().await.map_err(|e| PlatformError::Parse(e.to_string()))?;
        Ok(RawTimeline(body))
    }

    fn parse_timeline(&self, raw: &RawTimeline) -> Result<Vec<InboundEvent>, PlatformError> {
        parse_search(raw)
    }

    async fn post(&self, text: &str, in_reply_to: Option<&str>) -> Result<String, PlatformError> {
        let mut body = serde_json::json!({ "text": text });
        if let Some(parent) = in_reply_to {
            body["reply"] = serde_json::json!({ "in_reply_to_tweet_id": parent });
        }

        let resp = self
            .client
            .post(self.post_endpoint())
            .bearer_auth(&self.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        let resp = check_status(resp).await?;
        let posted: PostResponse =
            resp.json().await.map_err(|e| PlatformError::Parse(e.to_string()))?;

        match posted.data {
            Some(tweet) => {
                tracing::info!(tweet_id = %tweet.id, reply = in_reply_to.is_some(), "posted");
                Ok(tweet.id)
            }
            None => Err(PlatformError::Parse(join_errors(&posted.errors))),
        }
    }
}
