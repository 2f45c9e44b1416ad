use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use router_types::{
    BackendId, BudgetDecision, LedgerReport, LedgerState, SavingsEntry, SubscriptionCounters, UserCosts,
};

use crate::storage::JsonDocument;

const SESSION_WINDOW: i64 = 5 * 60; // 5h in minutes
const WEEKLY_WINDOW_DAYS: i64 = 7;
const DAILY_WINDOW_HOURS: i64 = 24;
const MONTHLY_WINDOW_DAYS: i64 = 30;
const SAVINGS_RETENTION_DAYS: i64 = 90;

/// Token caps the session/weekly percentages are measured against, one
/// pair per subscription backend. Claude Code and Codex have different
/// plan sizes, so the caps differ.
fn session_token_cap(backend: BackendId) -> u64 {
    match backend {
        BackendId::ClaudeCode => 200_000,
        BackendId::Codex => 150_000,
        _ => u64::MAX,
    }
}

fn weekly_token_cap(backend: BackendId) -> u64 {
    match backend {
        BackendId::ClaudeCode => 2_000_000,
        BackendId::Codex => 1_500_000,
        _ => u64::MAX,
    }
}

/// What the same work would have cost on the paid API, used to compute
/// the "savings" entry recorded for every non-API execution.
pub fn equivalent_api_cost(tokens: u64) -> f64 {
    let tokens = tokens as f64;
    0.7 * tokens * (3.0 / 1000.0) / 1000.0 + 0.3 * tokens * (15.0 / 1000.0) / 1000.0
}

pub struct Ledger {
    doc: JsonDocument<LedgerState>,
    daily_budget_usd: f64,
    monthly_budget_usd: f64,
}

impl Ledger {
    pub async fn open(path: PathBuf, daily_budget_usd: f64, monthly_budget_usd: f64) -> anyhow::Result<Self> {
        let doc = JsonDocument::open(path).await?;
        Ok(Self { doc, daily_budget_usd, monthly_budget_usd })
    }

    /// Applies every overdue reset to the in-memory state. Called before
    /// every read/write that depends on the counters being current.
    pub async fn check_resets(&self) {
        let _ = self
            .doc
            .mutate(|state| {
                apply_resets(state, Utc::now());
            })
            .await;
    }

    pub async fn check_budget(&self, backend: BackendId, estimated_tokens: u64) -> BudgetDecision {
        self.check_resets().await;
        if backend != BackendId::Api {
            return BudgetDecision { allowed: true, reason: None };
        }
        let state = self.doc.get().await;
        let estimated_cost = equivalent_api_cost(estimated_tokens);
        if state.api.daily_usd + estimated_cost > self.daily_budget_usd {
            return BudgetDecision {
                allowed: false,
                reason: Some(format!(
                    "daily API budget exceeded: {:.2} + {:.2} > {:.2}",
                    state.api.daily_usd, estimated_cost, self.daily_budget_usd
                )),
            };
        }
        if state.api.monthly_usd + estimated_cost > self.monthly_budget_usd {
            return BudgetDecision {
                allowed: false,
                reason: Some(format!(
                    "monthly API budget exceeded: {:.2} + {:.2} > {:.2}",
                    state.api.monthly_usd, estimated_cost, self.monthly_budget_usd
                )),
            };
        }
        BudgetDecision { allowed: true, reason: None }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_usage(
        &self,
        backend: BackendId,
        actual_tokens: u64,
        actual_cost_usd: f64,
        user_id: &str,
    ) -> anyhow::Result<()> {
        self.check_resets().await;
        let now = Utc::now();
        let equivalent = equivalent_api_cost(actual_tokens);

        self.doc
            .mutate(|state| {
                match backend {
                    BackendId::ClaudeCode => {
                        state.claude_code.tasks_completed += 1;
                        state.claude_code.token_total += actual_tokens;
                        record_subscription_usage(&mut state.claude_code, backend, actual_tokens);
                    }
                    BackendId::Codex => {
                        state.codex.tasks_completed += 1;
                        state.codex.token_total += actual_tokens;
                        record_subscription_usage(&mut state.codex, backend, actual_tokens);
                    }
                    BackendId::Api => {
                        state.api.tasks_completed += 1;
                        state.api.token_total += actual_tokens;
                        state.api.daily_usd += actual_cost_usd;
                        state.api.monthly_usd += actual_cost_usd;
                        let entry = state.per_user.entry(user_id.to_string()).or_default();
                        entry.tasks_completed += 1;
                        entry.token_total += actual_tokens;
                        entry.daily_usd += actual_cost_usd;
                        entry.monthly_usd += actual_cost_usd;
                    }
                    BackendId::Local => {
                        state.local.tasks_completed += 1;
                        state.local.token_total += actual_tokens;
                    }
                }

                if backend != BackendId::Api {
                    state.savings.push(SavingsEntry { amount_usd: equivalent, at: now });
                    state.total_saved_usd += equivalent;
                }
                prune_savings(state, now);
            })
            .await?;
        Ok(())
    }

    pub async fn reset_session(&self, backend: BackendId) -> anyhow::Result<()> {
        self.doc
            .mutate(|state| {
                let counters = match backend {
                    BackendId::ClaudeCode => &mut state.claude_code,
                    BackendId::Codex => &mut state.codex,
                    _ => return,
                };
                counters.session_percent = 0.0;
                counters.session_token_total = 0;
                counters.session_reset_at = Some(Utc::now());
            })
            .await?;
        Ok(())
    }

    pub async fn get_report(&self) -> LedgerReport {
        self.check_resets().await;
        let state = self.doc.get().await;
        LedgerReport {
            claude_code: state.claude_code,
            codex: state.codex,
            api: state.api,
            local: state.local,
            total_saved_usd: state.total_saved_usd,
        }
    }

    pub async fn get_savings(&self) -> Vec<SavingsEntry> {
        self.doc.get().await.savings
    }

    pub async fn get_user_costs(&self, user_id: &str) -> UserCosts {
        let state = self.doc.get().await;
        let counters = state.per_user.get(user_id).cloned().unwrap_or_default();
        UserCosts {
            user_id: user_id.to_string(),
            daily_usd: counters.daily_usd,
            monthly_usd: counters.monthly_usd,
            token_total: counters.token_total,
        }
    }
}

fn prune_savings(state: &mut LedgerState, now: DateTime<Utc>) {
    let cutoff = now - Duration::days(SAVINGS_RETENTION_DAYS);
    state.savings.retain(|entry| entry.at >= cutoff);
}

fn apply_resets(state: &mut LedgerState, now: DateTime<Utc>) {
    reset_subscription(&mut state.claude_code, now);
    reset_subscription(&mut state.codex, now);

    let daily_due = state
        .api
        .daily_reset_at
        .map(|at| now - at >= Duration::hours(DAILY_WINDOW_HOURS))
        .unwrap_or(true);
    if daily_due {
        state.api.daily_usd = 0.0;
        state.api.daily_reset_at = Some(now);
        for counters in state.per_user.values_mut() {
            counters.daily_usd = 0.0;
            counters.daily_reset_at = Some(now);
        }
    }

    let monthly_due = state
        .api
        .monthly_reset_at
        .map(|at| now - at >= Duration::days(MONTHLY_WINDOW_DAYS))
        .unwrap_or(true);
    if monthly_due {
        state.api.monthly_usd = 0.0;
        state.api.monthly_reset_at = Some(now);
        for counters in state.per_user.values_mut() {
            counters.monthly_usd = 0.0;
            counters.monthly_reset_at = Some(now);
        }
    }
}

fn reset_subscription(counters: &mut SubscriptionCounters, now: DateTime<Utc>) {
    let session_due = counters
        .session_reset_at
        .map(|at| now - at >= Duration::minutes(SESSION_WINDOW))
        .unwrap_or(true);
    if session_due {
        counters.session_percent = 0.0;
        counters.session_token_total = 0;
        counters.session_reset_at = Some(now);
    }

    let weekly_due = counters
        .weekly_reset_at
        .map(|at| now - at >= Duration::days(WEEKLY_WINDOW_DAYS))
        .unwrap_or(true);
    if weekly_due {
        counters.weekly_percent = 0.0;
        counters.weekly_token_total = 0;
        counters.weekly_reset_at = Some(now);
    }
}

fn record_subscription_usage(counters: &mut SubscriptionCounters, backend: BackendId, actual_tokens: u64) {
    counters.session_token_total += actual_tokens;
    counters.weekly_token_total += actual_tokens;
    counters.session_percent = (counters.session_token_total as f64 / session_token_cap(backend) as f64).min(1.0);
    counters.weekly_percent = (counters.weekly_token_total as f64 / weekly_token_cap(backend) as f64).min(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_check_blocks_over_daily_limit() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json"), 0.01, 500.0).await.unwrap();
        let decision = ledger.check_budget(BackendId::Api, 1_000_000).await;
        assert!(!decision.allowed);
        assert!(decision.reason.is_some());
    }

    #[tokio::test]
    async fn subscription_usage_is_free_and_recorded_as_savings() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json"), 25.0, 500.0).await.unwrap();
        ledger.record_usage(BackendId::ClaudeCode, 4000, 0.0, "meir").await.unwrap();
        let report = ledger.get_report().await;
        assert_eq!(report.claude_code.tasks_completed, 1);
        assert!(report.total_saved_usd > 0.0);
    }

    #[tokio::test]
    async fn api_usage_is_tracked_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json"), 25.0, 500.0).await.unwrap();
        ledger.record_usage(BackendId::Api, 2000, 0.05, "meir").await.unwrap();
        let costs = ledger.get_user_costs("meir").await;
        assert_eq!(costs.daily_usd, 0.05);
    }

    #[tokio::test]
    async fn subscription_usage_raises_session_and_weekly_percent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json"), 25.0, 500.0).await.unwrap();
        ledger.record_usage(BackendId::ClaudeCode, 20_000, 0.0, "meir").await.unwrap();
        let state = ledger.doc.get().await;
        assert!(state.claude_code.session_percent > 0.0);
        assert!(state.claude_code.weekly_percent > 0.0);
        assert!(state.claude_code.weekly_percent <= state.claude_code.session_percent);
    }

    #[tokio::test]
    async fn load_save_load_is_a_fixed_point_modulo_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Ledger::open(path.clone(), 25.0, 500.0).await.unwrap();
        ledger.record_usage(BackendId::Codex, 1000, 0.0, "meir").await.unwrap();
        let reopened = Ledger::open(path, 25.0, 500.0).await.unwrap();
        let report = reopened.get_report().await;
        assert_eq!(report.codex.tasks_completed, 1);
    }
}
