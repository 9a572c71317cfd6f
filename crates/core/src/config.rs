use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;

use crate::runtime::interval::{IntervalWindow, InvalidWindow};

const ENV_PREFIX: &str = "HANA_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("agent_handle must be set")]
    MissingHandle,
    #[error("invalid {name} window: {source}")]
    Window {
        name: &'static str,
        #[source]
        source: InvalidWindow,
    },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("config table error: {0}")]
    Database(#[from] sqlx::Error),
}

/// All orchestration parameters. Defaults, then the `hana_config` table,
/// then `HANA_*` environment overrides. Secrets never live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HanaCfg {
    // identity
    pub agent_name: String,
    pub agent_handle: String,

    // inbound loop
    pub monitor_interval_min_secs: u64,
    pub monitor_interval_max_secs: u64,
    pub reply_search_limit: usize,
    pub recency_threshold_secs: u64,
    pub max_replies_per_cycle: usize,
    pub inter_event_delay_max_secs: u64,

    // outbound loop
    pub post_interval_min_secs: u64,
    pub post_interval_max_secs: u64,

    // composition
    pub reply_temperature: f32,
    pub post_temperature: f32,
    pub completion_max_tokens: u32,
    pub transcript_limit: usize,
    pub subject_summary: String,
    /// Stored insights of each scope included in reply prompts.
    pub insight_limit: usize,

    // market data
    /// Token contract address; empty disables live market data.
    pub token_address: String,
    pub market_data_url: String,
    pub market_data_ttl_secs: u64,

    /// Fixed seed for reproducible jitter; OS entropy when unset.
    pub rng_seed: Option<u64>,
}

impl Default for HanaCfg {
    fn default() -> Self {
        Self {
            agent_name: "hana".into(),
            agent_handle: String::new(),
            monitor_interval_min_secs: 4 * 3600,
            monitor_interval_max_secs: 12 * 3600,
            reply_search_limit: 50,
            recency_threshold_secs: 24 * 3600,
            max_replies_per_cycle: 3,
            inter_event_delay_max_secs: 30,
            post_interval_min_secs: 12 * 3600,
            post_interval_max_secs: 24 * 3600,
            reply_temperature: 0.7,
            post_temperature: 0.3,
            completion_max_tokens: 1024,
            transcript_limit: 20,
            subject_summary: String::new(),
            insight_limit: 5,
            token_address: String::new(),
            market_data_url: "https://api.dexscreener.com".into(),
            market_data_ttl_secs: 300,
            rng_seed: None,
        }
    }
}

impl HanaCfg {
    /// Load config from `hana_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, ConfigError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM hana_config")
            .fetch_all(pool)
            .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Write all default values into `hana_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for (key, value, desc) in &self.to_entries() {
            sqlx::query(
                "INSERT INTO hana_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub fn from_map(m: &HashMap<String, String>) -> Self {
        Self::default().merged(m)
    }

    /// Overlay string values onto `self`. Unknown keys and unparsable values
    /// are ignored.
    pub fn merged(self, m: &HashMap<String, String>) -> Self {
        let d = self;
        Self {
            agent_name: get_or(m, "agent_name", d.agent_name),
            agent_handle: get_or(m, "agent_handle", d.agent_handle),
            monitor_interval_min_secs: get_or(m, "monitor_interval_min_secs", d.monitor_interval_min_secs),
            monitor_interval_max_secs: get_or(m, "monitor_interval_max_secs", d.monitor_interval_max_secs),
            reply_search_limit: get_or(m, "reply_search_limit", d.reply_search_limit),
            recency_threshold_secs: get_or(m, "recency_threshold_secs", d.recency_threshold_secs),
            max_replies_per_cycle: get_or(m, "max_replies_per_cycle", d.max_replies_per_cycle),
            inter_event_delay_max_secs: get_or(m, "inter_event_delay_max_secs", d.inter_event_delay_max_secs),
            post_interval_min_secs: get_or(m, "post_interval_min_secs", d.post_interval_min_secs),
            post_interval_max_secs: get_or(m, "post_interval_max_secs", d.post_interval_max_secs),
            reply_temperature: get_or(m, "reply_temperature", d.reply_temperature),
            post_temperature: get_or(m, "post_temperature", d.post_temperature),
            completion_max_tokens: get_or(m, "completion_max_tokens", d.completion_max_tokens),
            transcript_limit: get_or(m, "transcript_limit", d.transcript_limit),
            subject_summary: get_or(m, "subject_summary", d.subject_summary),
            insight_limit: get_or(m, "insight_limit", d.insight_limit),
            token_address: get_or(m, "token_address", d.token_address),
            market_data_url: get_or(m, "market_data_url", d.market_data_url),
            market_data_ttl_secs: get_or(m, "market_data_ttl_secs", d.market_data_ttl_secs),
            rng_seed: m.get("rng_seed").and_then(|v| v.parse().ok()).or(d.rng_seed),
        }
    }

    /// Apply `HANA_<KEY>` environment variables on top of the current values.
    pub fn with_env(self) -> Self {
        let overrides = env_overrides(std::env::vars());
        self.merged(&overrides)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_handle.trim().trim_start_matches('@').is_empty() {
            return Err(ConfigError::MissingHandle);
        }
        self.monitor_window()?;
        self.post_window()?;
        if self.max_replies_per_cycle == 0 {
            return Err(ConfigError::Zero("max_replies_per_cycle"));
        }
        if self.reply_search_limit == 0 {
            return Err(ConfigError::Zero("reply_search_limit"));
        }
        Ok(())
    }

    pub fn monitor_window(&self) -> Result<IntervalWindow, ConfigError> {
        IntervalWindow::from_secs(self.monitor_interval_min_secs, self.monitor_interval_max_secs)
            .map_err(|source| ConfigError::Window { name: "monitor", source })
    }

    pub fn post_window(&self) -> Result<IntervalWindow, ConfigError> {
        IntervalWindow::from_secs(self.post_interval_min_secs, self.post_interval_max_secs)
            .map_err(|source| ConfigError::Window { name: "post", source })
    }

    pub fn recency_threshold(&self) -> Duration {
        Duration::from_secs(self.recency_threshold_secs)
    }

    pub fn inter_event_delay_max(&self) -> Duration {
        Duration::from_secs(self.inter_event_delay_max_secs)
    }

    pub fn market_data_ttl(&self) -> Duration {
        Duration::from_secs(self.market_data_ttl_secs)
    }

    fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("agent_name", self.agent_name.clone(), "Agent display name"),
            ("agent_handle", self.agent_handle.clone(), "Agent platform handle"),
            ("monitor_interval_min_secs", self.monitor_interval_min_secs.to_string(), "Min wait between reply cycles"),
            ("monitor_interval_max_secs", self.monitor_interval_max_secs.to_string(), "Max wait between reply cycles"),
            ("reply_search_limit", self.reply_search_limit.to_string(), "Replies requested per fetch"),
            ("recency_threshold_secs", self.recency_threshold_secs.to_string(), "Replies older than this are ignored"),
            ("max_replies_per_cycle", self.max_replies_per_cycle.to_string(), "Upper bound of sampled replies per cycle"),
            ("inter_event_delay_max_secs", self.inter_event_delay_max_secs.to_string(), "Exclusive ceiling of delay between replies"),
            ("post_interval_min_secs", self.post_interval_min_secs.to_string(), "Min wait between unprompted posts"),
            ("post_interval_max_secs", self.post_interval_max_secs.to_string(), "Max wait between unprompted posts"),
            ("reply_temperature", self.reply_temperature.to_string(), "Sampling temperature for replies"),
            ("post_temperature", self.post_temperature.to_string(), "Sampling temperature for posts"),
            ("completion_max_tokens", self.completion_max_tokens.to_string(), "Max tokens per completion"),
            ("transcript_limit", self.transcript_limit.to_string(), "Fragments included in transcripts"),
            ("subject_summary", self.subject_summary.clone(), "Subject-matter briefing text"),
            ("insight_limit", self.insight_limit.to_string(), "Stored insights per scope in reply prompts"),
            ("token_address", self.token_address.clone(), "Token contract address, empty disables market data"),
            ("market_data_url", self.market_data_url.clone(), "Market data API base URL"),
            ("market_data_ttl_secs", self.market_data_ttl_secs.to_string(), "How long a market summary is reused"),
            ("rng_seed", self.rng_seed.map(|s| s.to_string()).unwrap_or_default(), "Jitter seed, empty for OS entropy"),
        ]
    }
}

/// Collect `HANA_*` variables as lowercase config keys.
pub fn env_overrides<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|rest| (rest.to_lowercase(), v)))
        .collect()
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_use_hour_scale_windows() {
        let cfg = HanaCfg::default();
        let monitor = cfg.monitor_window().unwrap();
        assert_eq!(monitor.min(), Duration::from_secs(4 * 3600));
        assert_eq!(monitor.max(), Duration::from_secs(12 * 3600));
        let post = cfg.post_window().unwrap();
        assert_eq!(post.min(), Duration::from_secs(12 * 3600));
        assert_eq!(post.max(), Duration::from_secs(24 * 3600));
        assert_eq!(cfg.reply_search_limit, 50);
        assert_eq!(cfg.max_replies_per_cycle, 3);
        assert!(cfg.post_temperature < cfg.reply_temperature);
    }

    #[test]
    fn map_overrides_and_ignores_garbage() {
        let cfg = HanaCfg::from_map(&map(&[
            ("agent_handle", "hana_bot"),
            ("reply_search_limit", "10"),
            ("max_replies_per_cycle", "not-a-number"),
            ("rng_seed", "42"),
            ("unknown", "x"),
        ]));
        assert_eq!(cfg.agent_handle, "hana_bot");
        assert_eq!(cfg.reply_search_limit, 10);
        assert_eq!(cfg.max_replies_per_cycle, 3);
        assert_eq!(cfg.rng_seed, Some(42));
    }

    #[test]
    fn empty_seed_entry_means_unseeded() {
        let cfg = HanaCfg::from_map(&map(&[("rng_seed", "")]));
        assert_eq!(cfg.rng_seed, None);
    }

    #[test]
    fn env_prefix_is_stripped_and_lowercased() {
        let vars = vec![
            ("HANA_AGENT_HANDLE".to_string(), "@hana".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ];
        let overrides = env_overrides(vars);
        assert_eq!(overrides.get("agent_handle").map(String::as_str), Some("@hana"));
        assert_eq!(overrides.len(), 1);
    }

    #[test]
    fn validate_rejects_missing_handle_and_inverted_windows() {
        let cfg = HanaCfg::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingHandle)));

        let cfg = HanaCfg::from_map(&map(&[
            ("agent_handle", "hana_bot"),
            ("post_interval_min_secs", "100"),
            ("post_interval_max_secs", "10"),
        ]));
        assert!(matches!(cfg.validate(), Err(ConfigError::Window { name: "post", .. })));

        let cfg = HanaCfg::from_map(&map(&[("agent_handle", "hana_bot")]));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn entries_cover_every_field() {
        let cfg = HanaCfg::default();
        let entries: HashMap<String, String> = cfg
            .to_entries()
            .into_iter()
            .map(|(k, v, _)| (k.to_string(), v))
            .collect();
        let round = HanaCfg::from_map(&entries);
        assert_eq!(round.monitor_interval_max_secs, cfg.monitor_interval_max_secs);
        assert_eq!(round.rng_seed, None);
        assert_eq!(round.market_data_url, cfg.market_data_url);
        assert_eq!(entries.len(), 20);
    }
}
