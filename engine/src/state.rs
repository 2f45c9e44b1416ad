//! Wires every stateful component together from one data directory. The
//! CLI and the dashboard server share this: each subcommand opens a fresh
//! `AppState`, does its work, and lets everything flush to disk on drop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use router_core::circuit_breaker::CircuitBreakerConfig as BreakerConfig;
use router_core::config::BackendConfig;
use router_core::{CircuitBreaker, ConfigStore, Dedup, EventBus, HealthMonitor, Ledger, RateGovernor, Router};
use router_planner::Planner;
use router_providers::{ApiAdapter, BackendRegistry, ClaudeCodeAdapter, CodexAdapter, LocalAdapter};
use router_scheduler::Scheduler;
use router_shadowbench::ShadowBenchManager;
use router_types::{BackendId, NoopShadowDispatcher, NoopTrustQuery, ShadowDispatcher, TrustQuery};

/// Everything a CLI invocation or a dashboard request needs. Built fresh
/// per process; the JSON documents underneath each component are the only
/// thing that actually persists across runs.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: ConfigStore,
    pub events: EventBus,
    pub adapters: BackendRegistry,
    pub governor: Arc<RateGovernor>,
    pub breaker: Arc<CircuitBreaker>,
    pub router: Arc<Router>,
    pub scheduler: Arc<Scheduler>,
    pub shadow: ShadowBenchManager,
}

impl AppState {
    pub async fn open() -> anyhow::Result<Self> {
        let data_dir = router_core::paths::data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        let config = ConfigStore::new(data_dir.join("config.json"), None).await?;
        let app_config = config.get().await;

        let events = EventBus::new();

        let mut default_limits = BTreeMap::new();
        for backend in BackendId::ALL {
            default_limits.insert(backend, backend_rate_limit(backend, &app_config.backends));
        }
        let governor = Arc::new(
            RateGovernor::open(data_dir.join(router_core::paths::RATE_GOVERNOR_FILE), events.clone(), default_limits)
                .await?,
        );

        let breaker_config = BreakerConfig {
            failure_threshold: app_config.circuit_breaker.failure_threshold,
            failure_window_minutes: app_config.circuit_breaker.failure_window_minutes,
            cooldown_minutes: app_config.circuit_breaker.cooldown_minutes,
        };
        let breaker = Arc::new(
            CircuitBreaker::open(
                data_dir.join(router_core::paths::CIRCUIT_BREAKER_FILE),
                events.clone(),
                Arc::clone(&governor),
                breaker_config,
            )
            .await?,
        );

        let ledger = Ledger::open(
            data_dir.join(router_core::paths::LEDGER_FILE),
            app_config.api_budget.daily_budget_usd,
            app_config.api_budget.monthly_budget_usd,
        )
        .await?;

        let dedup = Dedup::open(data_dir.join("dedup-state.json")).await?;
        let adapters = build_registry(&app_config.backends);

        let health = HealthMonitor::open(
            data_dir.join(router_core::paths::BACKEND_HEALTH_FILE),
            adapters.clone(),
            Arc::clone(&breaker),
        )
        .await?;

        let shadow = ShadowBenchManager::open(
            &data_dir.join(router_core::paths::SHADOW_BENCH_DB_FILE),
            adapters.clone(),
            Arc::clone(&governor) as Arc<dyn router_types::ShadowGovernorProbe>,
            Arc::new(events.clone()) as Arc<dyn router_types::ShadowEventSink>,
            app_config.shadow_bench.idle_threshold,
            app_config.shadow_bench.max_concurrent_shadows as usize,
        )
        .await
        .map_err(|e| anyhow::anyhow!("opening shadow-bench store: {e}"))?;

        let (shadow_dispatcher, trust_query): (Arc<dyn ShadowDispatcher>, Arc<dyn TrustQuery>) =
            if app_config.shadow_bench.enabled {
                (Arc::new(shadow.clone()), Arc::new(shadow.clone()))
            } else {
                (Arc::new(NoopShadowDispatcher), Arc::new(NoopTrustQuery))
            };

        let router = Arc::new(
            Router::new(
                data_dir.join(router_core::paths::PENDING_PLANS_FILE),
                Planner::new(),
                ledger,
                Arc::clone(&governor),
                Arc::clone(&breaker),
                dedup,
                health,
                adapters.clone(),
                events.clone(),
                shadow_dispatcher,
                trust_query,
            )
            .await?,
        );

        let scheduler = Arc::new(
            Scheduler::open(
                data_dir.join(router_core::paths::QUEUE_STATE_FILE),
                adapters.clone(),
                Arc::clone(&breaker),
                events.clone(),
                app_config.scheduler.clone(),
            )
            .await?,
        );

        Ok(Self { data_dir, config, events, adapters, governor, breaker, router, scheduler, shadow })
    }
}

fn default_backend_rate_limit(backend: BackendId) -> u32 {
    match backend {
        BackendId::ClaudeCode => 0,
        BackendId::Codex => 0,
        BackendId::Api => 120,
        BackendId::Local => 0,
    }
}

fn backend_rate_limit(backend: BackendId, configured: &BTreeMap<BackendId, BackendConfig>) -> u32 {
    configured.get(&backend).map(|c| c.rate_limit).unwrap_or_else(|| default_backend_rate_limit(backend))
}

fn backend_timeout(backend: BackendId, configured: &BTreeMap<BackendId, BackendConfig>) -> Duration {
    Duration::from_secs(configured.get(&backend).map(|c| c.timeout_secs).unwrap_or(300))
}

fn build_registry(configured: &BTreeMap<BackendId, BackendConfig>) -> BackendRegistry {
    let api_key = std::env::var("ROUTER_API_KEY").ok();
    let api_base_url = std::env::var("ROUTER_API_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
    let local_base_url = std::env::var("ROUTER_LOCAL_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:11434".to_string());

    BackendRegistry::new(vec![
        Arc::new(ClaudeCodeAdapter::new(backend_timeout(BackendId::ClaudeCode, configured))),
        Arc::new(CodexAdapter::new(backend_timeout(BackendId::Codex, configured))),
        Arc::new(ApiAdapter::new(api_base_url, api_key)),
        Arc::new(LocalAdapter::new(local_base_url)),
    ])
}
