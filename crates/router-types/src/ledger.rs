use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionCounters {
    pub session_percent: f64,
    pub weekly_percent: f64,
    pub tasks_completed: u64,
    pub token_total: u64,
    #[serde(default)]
    pub session_token_total: u64,
    #[serde(default)]
    pub weekly_token_total: u64,
    pub session_reset_at: Option<DateTime<Utc>>,
    pub weekly_reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiCounters {
    pub daily_usd: f64,
    pub monthly_usd: f64,
    pub token_total: u64,
    pub tasks_completed: u64,
    pub daily_reset_at: Option<DateTime<Utc>>,
    pub monthly_reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalCounters {
    pub tasks_completed: u64,
    pub token_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsEntry {
    pub amount_usd: f64,
    pub at: DateTime<Utc>,
}

/// The single persisted ledger document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub claude_code: SubscriptionCounters,
    pub codex: SubscriptionCounters,
    pub api: ApiCounters,
    pub local: LocalCounters,
    #[serde(default)]
    pub per_user: BTreeMap<String, ApiCounters>,
    #[serde(default)]
    pub savings: Vec<SavingsEntry>,
    #[serde(default)]
    pub total_saved_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReport {
    pub claude_code: SubscriptionCounters,
    pub codex: SubscriptionCounters,
    pub api: ApiCounters,
    pub local: LocalCounters,
    pub total_saved_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCosts {
    pub user_id: String,
    pub daily_usd: f64,
    pub monthly_usd: f64,
    pub token_total: u64,
}
