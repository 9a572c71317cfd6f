use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Manager, ManagerError, ManagerId};
use crate::types::ConversationState;

/// Manager-data key holding the subject-matter briefing.
pub const SUBJECT_SUMMARY: &str = "subject_summary";
/// Manager-data key holding the live market summary for the agent's token.
pub const TOKEN_DATA: &str = "token_data";

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    #[error("market data request failed: {0}")]
    Transport(String),
    #[error("market data api returned {status}")]
    Api { status: u16 },
    #[error("market data parse error: {0}")]
    Parse(String),
    #[error("no trading pairs found")]
    NoPairs,
}

/// Where the one-line market summary comes from.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn token_summary(&self) -> Result<String, MarketDataError>;
}

// ── DexScreener ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenPairs {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Pair {
    base_token: BaseToken,
    price_usd: Option<String>,
    price_native: String,
    volume: Windows,
    price_change: Windows,
    market_cap: f64,
    fdv: f64,
    liquidity: Liquidity,
    txns: Txns,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BaseToken {
    symbol: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Windows {
    m5: f64,
    h1: f64,
    h6: f64,
    h24: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Liquidity {
    usd: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Txns {
    h1: BuysSells,
    h24: BuysSells,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BuysSells {
    buys: u64,
    sells: u64,
}

fn format_summary(pair: &Pair) -> String {
    let symbol = if pair.base_token.symbol.is_empty() { "Token" } else { pair.base_token.symbol.as_str() };
    format!(
        "{symbol} trading summary: Price: {} USD ({} native). Volumes: 24h: {:.2} USD, 1h: {:.2} USD. \
         Market metrics: Cap: {:.2} USD, FDV: {:.2} USD, Liquidity: {:.2} USD. \
         Transactions: 24h - {} buys, {} sells; 1h - {} buys, {} sells. \
         Price changes: 5m: {:.2}%, 1h: {:.2}%, 6h: {:.2}%, 24h: {:.2}%.",
        pair.price_usd.as_deref().unwrap_or("unknown"),
        pair.price_native,
        pair.volume.h24,
        pair.volume.h1,
        pair.market_cap,
        pair.fdv,
        pair.liquidity.usd,
        pair.txns.h24.buys,
        pair.txns.h24.sells,
        pair.txns.h1.buys,
        pair.txns.h1.sells,
        pair.price_change.m5,
        pair.price_change.h1,
        pair.price_change.h6,
        pair.price_change.h24,
    )
}

/// Summary of the first listed pair in a token-pairs response.
fn parse_pairs(body: Value) -> Result<String, MarketDataError> {
    let resp: TokenPairs = serde_json::from_value(body).map_err(|e| MarketDataError::Parse(e.to_string()))?;
    let pairs = resp.pairs.unwrap_or_default();
    pairs.first().map(format_summary).ok_or(MarketDataError::NoPairs)
}

/// Token pair data from the DexScreener public API.
pub struct DexScreenerSource {
    client: reqwest::Client,
    base_url: String,
    token_address: String,
}

impl DexScreenerSource {
    pub fn new(base_url: &str, token_address: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token_address: token_address.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/latest/dex/tokens/{}", self.base_url, self.token_address)
    }
}

#[async_trait::async_trait]
impl MarketDataSource for DexScreenerSource {
    async fn token_summary(&self) -> Result<String, MarketDataError> {
        let resp = self
            .client
            .get(self.endpoint())
            .send()
            .await
            .map_err(|e| MarketDataError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MarketDataError::Api { status: resp.status().as_u16() });
        }
        let body: Value = resp.json().await.map_err(|e| MarketDataError::Parse(e.to_string()))?;
        parse_pairs(body)
    }
}

// ── Cache ──────────────────────────────────────────────────────

/// Reuses a successful summary for `ttl`. Failures are not cached.
pub struct CachedMarketData {
    source: Arc<dyn MarketDataSource>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, String)>>,
}

impl CachedMarketData {
    pub fn new(source: Arc<dyn MarketDataSource>, ttl: Duration) -> Self {
        Self { source, ttl, cached: Mutex::new(None) }
    }
}

#[async_trait::async_trait]
impl MarketDataSource for CachedMarketData {
    async fn token_summary(&self) -> Result<String, MarketDataError> {
        // Held across the fetch so both loops share one request.
        let mut cached = self.cached.lock().await;
        if let Some((expires_at, summary)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(summary.clone());
            }
        }
        let summary = self.source.token_summary().await?;
        *cached = Some((Instant::now() + self.ttl, summary.clone()));
        Ok(summary)
    }
}

// ── Manager ────────────────────────────────────────────────────

/// Supplies the briefing about what the agent talks about, plus live
/// market data when a source is configured.
pub struct SubjectManager {
    summary: String,
    market: Option<Arc<dyn MarketDataSource>>,
}

impl SubjectManager {
    pub fn new(summary: impl Into<String>) -> Self {
        Self { summary: summary.into(), market: None }
    }

    pub fn with_market_data(mut self, source: Arc<dyn MarketDataSource>) -> Self {
        self.market = Some(source);
        self
    }
}

#[async_trait::async_trait]
impl Manager for SubjectManager {
    fn id(&self) -> ManagerId {
        ManagerId::Subject
    }

    async fn context(&self, _state: &ConversationState) -> Result<Vec<(String, Value)>, ManagerError> {
        let mut entries = vec![(SUBJECT_SUMMARY.to_owned(), Value::String(self.summary.clone()))];
        if let Some(market) = &self.market {
            let data = match market.token_summary().await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::warn!(error = %e, "market data unavailable");
                    String::new()
                }
            };
            entries.push((TOKEN_DATA.to_owned(), Value::String(data)));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentIdentity, Fragment};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts fetches; fails while `failing` is set.
    #[derive(Default)]
    struct StubSource {
        calls: AtomicUsize,
        failing: bool,
    }

    #[async_trait::async_trait]
    impl MarketDataSource for StubSource {
        async fn token_summary(&self) -> Result<String, MarketDataError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing {
                return Err(MarketDataError::Api { status: 502 });
            }
            Ok(format!("summary #{n}"))
        }
    }

    fn seed_state() -> ConversationState {
        ConversationState::new(Fragment::seed(&AgentIdentity::new("hana", "hana_bot")))
    }

    #[test]
    fn summarizes_first_pair() {
        let body = json!({
            "pairs": [{
                "baseToken": {"symbol": "HANA"},
                "priceUsd": "0.0123",
                "priceNative": "0.00008",
                "volume": {"h24": 1500.5, "h1": 20.0},
                "priceChange": {"m5": 0.1, "h1": -1.25, "h6": 3.0, "h24": 12.5},
                "marketCap": 1000000.0,
                "fdv": 1200000.0,
                "liquidity": {"usd": 50000.0},
                "txns": {"h24": {"buys": 40, "sells": 12}, "h1": {"buys": 2, "sells": 1}}
            }, {
                "baseToken": {"symbol": "OTHER"}
            }]
        });
        let summary = parse_pairs(body).unwrap();
        assert!(summary.starts_with("HANA trading summary: Price: 0.0123 USD (0.00008 native)."));
        assert!(summary.contains("24h: 1500.50 USD"));
        assert!(summary.contains("24h - 40 buys, 12 sells; 1h - 2 buys, 1 sells"));
        assert!(summary.contains("1h: -1.25%"));
    }

    #[test]
    fn missing_pairs_is_an_error() {
        assert!(matches!(parse_pairs(json!({"pairs": null})), Err(MarketDataError::NoPairs)));
        assert!(matches!(parse_pairs(json!({"pairs": []})), Err(MarketDataError::NoPairs)));
        assert!(matches!(parse_pairs(json!({"pairs": 3})), Err(MarketDataError::Parse(_))));
    }

    #[test]
    fn endpoint_targets_token() {
        let source = DexScreenerSource::new("http://localhost:9/", "So1abc");
        assert_eq!(source.endpoint(), "http://localhost:9/latest/dex/tokens/So1abc");
    }

    #[tokio::test(start_paused = true)]
    async fn cache_reuses_summary_until_ttl_expires() {
        let stub = Arc::new(StubSource::default());
        let cache = CachedMarketData::new(stub.clone(), Duration::from_secs(300));

        assert_eq!(cache.token_summary().await.unwrap(), "summary #1");
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.token_summary().await.unwrap(), "summary #1");
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.token_summary().await.unwrap(), "summary #2");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let stub = Arc::new(StubSource { failing: true, ..StubSource::default() });
        let cache = CachedMarketData::new(stub.clone(), Duration::from_secs(300));
        assert!(cache.token_summary().await.is_err());
        assert!(cache.token_summary().await.is_err());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn context_carries_summary_and_market_data() {
        let manager = SubjectManager::new("on-chain markets").with_market_data(Arc::new(StubSource::default()));
        let ctx = manager.context(&seed_state()).await.unwrap();
        assert_eq!(ctx[0], (SUBJECT_SUMMARY.to_owned(), Value::String("on-chain markets".into())));
        assert_eq!(ctx[1], (TOKEN_DATA.to_owned(), Value::String("summary #1".into())));
    }

    #[tokio::test]
    async fn market_failure_leaves_token_data_empty() {
        let failing = StubSource { failing: true, ..StubSource::default() };
        let manager = SubjectManager::new("on-chain markets").with_market_data(Arc::new(failing));
        let ctx = manager.context(&seed_state()).await.unwrap();
        assert_eq!(ctx[1].1, Value::String(String::new()));

        let plain = SubjectManager::new("on-chain markets").context(&seed_state()).await.unwrap();
        assert_eq!(plain.len(), 1);
    }
}
