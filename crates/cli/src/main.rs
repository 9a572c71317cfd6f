use anyhow::Context;
use hana_core::config::HanaCfg;
use hana_core::managers::{
    CachedMarketData, DexScreenerSource, GuardrailsManager, InsightManager, Persona,
    PersonalityManager, PostingManager, SubjectManager,
};
use hana_core::platform::{PlatformClient, XClient};
use hana_core::runtime::{Orchestrator, ShutdownGuard};
use hana_core::store::{MemoryStore, PgStore, Store};
use hana_llm::provider::{LlmProvider, ToolDefinition};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("HANA_LOG_JSON").is_ok() {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

/// Connect and migrate when `DATABASE_URL` is set. Any failure falls back
/// to ephemeral mode.
async fn connect_database() -> Option<sqlx::PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        tracing::warn!("DATABASE_URL not set, running in ephemeral mode");
        return None;
    };

    let connect_result = tokio::time::timeout(
        std::time::Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
        sqlx::postgres::PgPoolOptions::new().max_connections(8).connect(&url),
    )
    .await;

    match connect_result {
        Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
            Ok(()) => {
                tracing::info!("database connected and migrations applied");
                Some(pool)
            }
            Err(e) => {
                tracing::warn!(error = %e, "database migration failed, falling back to ephemeral mode");
                None
            }
        },
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to connect DATABASE_URL, falling back to ephemeral mode");
            None
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = DB_CONNECT_TIMEOUT_SECS,
                "database connect timed out, falling back to ephemeral mode"
            );
            None
        }
    }
}

fn load_persona(cfg: &HanaCfg) -> anyhow::Result<Persona> {
    match std::env::var("HANA_PERSONA_FILE") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading persona file {path}"))?;
            Persona::from_json(&raw).with_context(|| format!("parsing persona file {path}"))
        }
        Err(_) => Ok(Persona::named(cfg.agent_name.clone())),
    }
}

/// Tool definitions from `HANA_TOOLS_FILE`, a JSON array. Empty when unset.
fn load_tools() -> anyhow::Result<Vec<ToolDefinition>> {
    let Ok(path) = std::env::var("HANA_TOOLS_FILE") else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading tools file {path}"))?;
    let tools: Vec<ToolDefinition> =
        serde_json::from_str(&raw).with_context(|| format!("parsing tools file {path}"))?;
    tracing::info!(count = tools.len(), "tool definitions loaded");
    Ok(tools)
}

fn subject_manager(cfg: &HanaCfg) -> SubjectManager {
    let manager = SubjectManager::new(cfg.subject_summary.clone());
    if cfg.token_address.is_empty() {
        return manager;
    }
    let source = DexScreenerSource::new(&cfg.market_data_url, cfg.token_address.clone());
    manager.with_market_data(Arc::new(CachedMarketData::new(Arc::new(source), cfg.market_data_ttl())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let pool = connect_database().await;

    // Defaults, then the config table, then HANA_* overrides.
    let cfg = match &pool {
        Some(pool) => HanaCfg::load(pool).await?,
        None => HanaCfg::default(),
    }
    .with_env();
    cfg.validate().context("invalid configuration")?;

    let store: Arc<dyn Store> = match pool {
        Some(pool) => Arc::new(PgStore::new(pool)),
        None => Arc::new(MemoryStore::new()),
    };

    let llm: Arc<dyn LlmProvider> = match hana_llm::http::from_env() {
        Some(p) => {
            tracing::info!(name = p.name(), "LLM provider initialized");
            Arc::new(p)
        }
        None => anyhow::bail!("HANA_LLM_MODEL and HANA_LLM_API_KEY must be set"),
    };

    let platform: Arc<dyn PlatformClient> = match XClient::from_env() {
        Some(client) => Arc::new(client),
        None => anyhow::bail!("HANA_X_BEARER_TOKEN must be set"),
    };

    let persona = load_persona(&cfg)?;
    let tools = load_tools()?;
    let shutdown = ShutdownGuard::new();
    shutdown.spawn_signal_listener();

    tracing::info!(agent = %cfg.agent_name, handle = %cfg.agent_handle, "starting hana");
    let orchestrator = Orchestrator::builder()
        .store(store.clone())
        .llm(llm.clone())
        .platform(platform.clone())
        .manager(Arc::new(GuardrailsManager::new(llm.clone())))
        .manager(Arc::new(InsightManager::new(llm, store.clone(), cfg.insight_limit)))
        .manager(Arc::new(PersonalityManager::new(persona)))
        .manager(Arc::new(subject_manager(&cfg)))
        .manager(Arc::new(PostingManager::new(platform, store, cfg.transcript_limit)))
        .tools(tools)
        .cancellation(shutdown.token())
        .config(cfg)
        .build()?;

    orchestrator.run().await;
    Ok(())
}
