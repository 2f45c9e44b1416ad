use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use router_types::BackendId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_concurrency() -> u32 {
    1
}
fn default_rate_limit() -> u32 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            rate_limit: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiBudgetConfig {
    #[serde(default = "default_daily_budget")]
    pub daily_budget_usd: f64,
    #[serde(default = "default_monthly_budget")]
    pub monthly_budget_usd: f64,
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_daily_budget() -> f64 {
    25.0
}
fn default_monthly_budget() -> f64 {
    500.0
}
fn default_model() -> String {
    "standard".to_string()
}

impl Default for ApiBudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget_usd: default_daily_budget(),
            monthly_budget_usd: default_monthly_budget(),
            default_model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_window_minutes")]
    pub failure_window_minutes: i64,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window_minutes() -> i64 {
    15
}
fn default_cooldown_minutes() -> i64 {
    10
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_minutes: default_failure_window_minutes(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowBenchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: f64,
    #[serde(default = "default_shadow_concurrency")]
    pub max_concurrent_shadows: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_idle_threshold() -> f64 {
    0.5
}
fn default_shadow_concurrency() -> u32 {
    3
}
fn default_retention_days() -> i64 {
    90
}

impl Default for ShadowBenchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_threshold: default_idle_threshold(),
            max_concurrent_shadows: default_shadow_concurrency(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub cooldowns_minutes: BTreeMap<BackendId, i64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_breaker_failures")]
    pub max_consecutive_circuit_breaker_failures: u32,
}

fn default_max_retries() -> u32 {
    2
}
fn default_max_breaker_failures() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let mut cooldowns_minutes = BTreeMap::new();
        cooldowns_minutes.insert(BackendId::ClaudeCode, 20);
        cooldowns_minutes.insert(BackendId::Codex, 5);
        Self {
            cooldowns_minutes,
            max_retries: default_max_retries(),
            max_consecutive_circuit_breaker_failures: default_max_breaker_failures(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardConfig {
    pub port: Option<u16>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backends: BTreeMap<BackendId, BackendConfig>,
    #[serde(default)]
    pub api_budget: ApiBudgetConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub shadow_bench: ShadowBenchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "default_warmup_interval_ms")]
    pub warmup_interval_ms: u64,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold_usd: f64,
}

fn default_warmup_interval_ms() -> u64 {
    15 * 60 * 1000
}
fn default_approval_threshold() -> f64 {
    2.00
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backends: BTreeMap::new(),
            api_budget: ApiBudgetConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            shadow_bench: ShadowBenchConfig::default(),
            scheduler: SchedulerConfig::default(),
            warmup_interval_ms: default_warmup_interval_ms(),
            dashboard: DashboardConfig::default(),
            approval_threshold_usd: default_approval_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    file: Value,
    env: Value,
    runtime: Value,
    cli: Value,
}

/// Layered configuration: file, then environment overrides, then
/// in-process runtime patches, then CLI flags. Unknown keys are ignored
/// by serde's default deserialization. Re-read on every `get`; callers
/// that need a snapshot should clone the returned `AppConfig`.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = read_json_file(&path).await.unwrap_or_else(|_| empty_object());

        let layers = ConfigLayers {
            file,
            env: env_layer(),
            runtime: empty_object(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };

        let store = Self { path, layers: Arc::new(RwLock::new(layers)) };
        store.save().await?;
        Ok(store)
    }

    pub async fn get(&self) -> AppConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.file);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    pub async fn patch_file(&self, patch: Value) -> anyhow::Result<()> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.file, &patch);
        }
        self.save().await
    }

    pub async fn patch_runtime(&self, patch: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.runtime, &patch);
    }

    async fn save(&self) -> anyhow::Result<()> {
        let snapshot = self.layers.read().await.file.clone();
        write_json_file(&self.path, &snapshot).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).await?;
    Ok(())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| empty_object()))
}

fn env_layer() -> Value {
    let mut root = empty_object();
    if let Ok(budget) = std::env::var("ROUTER_API_DAILY_BUDGET_USD") {
        if let Ok(v) = budget.parse::<f64>() {
            deep_merge(&mut root, &json!({ "api_budget": { "daily_budget_usd": v } }));
        }
    }
    if let Ok(budget) = std::env::var("ROUTER_API_MONTHLY_BUDGET_USD") {
        if let Ok(v) = budget.parse::<f64>() {
            deep_merge(&mut root, &json!({ "api_budget": { "monthly_budget_usd": v } }));
        }
    }
    if let Ok(model) = std::env::var("ROUTER_API_DEFAULT_MODEL") {
        deep_merge(&mut root, &json!({ "api_budget": { "default_model": model } }));
    }
    if let Ok(token) = std::env::var("ROUTER_DASHBOARD_AUTH_TOKEN") {
        deep_merge(&mut root, &json!({ "dashboard": { "auth_token": token } }));
    }
    root
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"totally_unknown_key": 42}"#).await.unwrap();
        let store = ConfigStore::new(&path, None).await.unwrap();
        let config = store.get().await;
        assert_eq!(config.approval_threshold_usd, 2.0);
    }

    #[tokio::test]
    async fn runtime_layer_overrides_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(&path, None).await.unwrap();
        store.patch_runtime(json!({ "approval_threshold_usd": 9.5 })).await;
        let config = store.get().await;
        assert_eq!(config.approval_threshold_usd, 9.5);
    }

    #[tokio::test]
    async fn cli_layer_overrides_runtime_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(&path, Some(json!({ "approval_threshold_usd": 1.0 }))).await.unwrap();
        store.patch_runtime(json!({ "approval_threshold_usd": 9.5 })).await;
        let config = store.get().await;
        assert_eq!(config.approval_threshold_usd, 1.0);
    }
}
