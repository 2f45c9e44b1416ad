use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use router_types::BackendId;
use serde::{Deserialize, Serialize};

use crate::event_bus::EventBus;
use crate::storage::JsonDocument;

const WINDOW_MINUTES: i64 = 60;
const SOFT_LIMIT_RATIO: f64 = 0.8;
const SOFT_LIMIT_DELAY_MS: u64 = 5000;
const THROTTLE_TIGHTEN_RATIO: f64 = 0.8;
const THROTTLE_COOLDOWN_MINUTES: i64 = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendGovernorState {
    pub requests: Vec<DateTime<Utc>>,
    pub current_limit: Option<u32>,
    pub default_limit: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub throttle_events: Vec<DateTime<Utc>>,
    pub recent_successes: u32,
    pub recent_failures: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernorState {
    pub backends: BTreeMap<BackendId, BackendGovernorState>,
}

#[derive(Debug, Clone)]
pub struct GovernorDecision {
    pub allowed: bool,
    pub delay_ms: Option<u64>,
    pub suggested_backend: Option<BackendId>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GovernorRecommendation {
    pub backend: BackendId,
    pub mean_inter_throttle_minutes: Option<f64>,
    pub effectiveness: f64,
}

pub struct RateGovernor {
    doc: JsonDocument<GovernorState>,
    events: EventBus,
    /// 0 means unlimited.
    default_limits: BTreeMap<BackendId, u32>,
}

impl RateGovernor {
    pub async fn open(
        path: PathBuf,
        events: EventBus,
        default_limits: BTreeMap<BackendId, u32>,
    ) -> anyhow::Result<Self> {
        let doc = JsonDocument::open(path).await?;
        Ok(Self { doc, events, default_limits })
    }

    fn default_limit_for(&self, backend: BackendId) -> u32 {
        self.default_limits.get(&backend).copied().unwrap_or(60)
    }

    pub async fn can_use(&self, backend: BackendId) -> GovernorDecision {
        let default_limit = self.default_limit_for(backend);
        if default_limit == 0 {
            return GovernorDecision { allowed: true, delay_ms: None, suggested_backend: None, reason: None };
        }

        let now = Utc::now();
        let state = self.doc.get().await;
        let entry = state.backends.get(&backend).cloned().unwrap_or_default();
        let limit = entry.current_limit.unwrap_or(default_limit).max(1);

        if let Some(cooldown_until) = entry.cooldown_until {
            if now < cooldown_until {
                return GovernorDecision {
                    allowed: false,
                    delay_ms: None,
                    suggested_backend: Some(self.suggest_alternative(&state, backend, now).await),
                    reason: Some("backend is in post-throttle cooldown".to_string()),
                };
            }
        }

        let window_start = now - Duration::minutes(WINDOW_MINUTES);
        let in_window = entry.requests.iter().filter(|t| **t >= window_start).count() as u32;

        if in_window >= limit {
            return GovernorDecision {
                allowed: false,
                delay_ms: None,
                suggested_backend: Some(self.suggest_alternative(&state, backend, now).await),
                reason: Some(format!("{in_window} requests in the last {WINDOW_MINUTES}m reached limit {limit}")),
            };
        }

        if (in_window as f64) >= SOFT_LIMIT_RATIO * limit as f64 {
            return GovernorDecision {
                allowed: true,
                delay_ms: Some(SOFT_LIMIT_DELAY_MS),
                suggested_backend: None,
                reason: Some("soft limit reached".to_string()),
            };
        }

        GovernorDecision { allowed: true, delay_ms: None, suggested_backend: None, reason: None }
    }

    async fn suggest_alternative(&self, state: &GovernorState, backend: BackendId, now: DateTime<Utc>) -> BackendId {
        let mut candidate = backend.next_in_chain();
        for _ in 0..BackendId::ALL.len() {
            if !self.is_denied(state, candidate, now) {
                return candidate;
            }
            candidate = candidate.next_in_chain();
        }
        candidate
    }

    fn is_denied(&self, state: &GovernorState, backend: BackendId, now: DateTime<Utc>) -> bool {
        let default_limit = self.default_limit_for(backend);
        if default_limit == 0 {
            return false;
        }
        let entry = match state.backends.get(&backend) {
            Some(e) => e,
            None => return false,
        };
        if let Some(cooldown_until) = entry.cooldown_until {
            if now < cooldown_until {
                return true;
            }
        }
        let limit = entry.current_limit.unwrap_or(default_limit).max(1);
        let window_start = now - Duration::minutes(WINDOW_MINUTES);
        let in_window = entry.requests.iter().filter(|t| **t >= window_start).count() as u32;
        in_window >= limit
    }

    pub async fn record_request(&self, backend: BackendId) -> anyhow::Result<()> {
        let now = Utc::now();
        let default_limit = self.default_limit_for(backend);
        self.doc
            .mutate(|state| {
                let entry = state.backends.entry(backend).or_insert_with(|| BackendGovernorState {
                    default_limit,
                    ..Default::default()
                });
                entry.requests.push(now);
                entry.requests.retain(|t| now - *t <= Duration::minutes(WINDOW_MINUTES));
            })
            .await?;
        Ok(())
    }

    pub async fn record_success(&self, backend: BackendId) -> anyhow::Result<()> {
        self.doc
            .mutate(|state| {
                let entry = state.backends.entry(backend).or_default();
                entry.recent_successes += 1;
            })
            .await?;
        Ok(())
    }

    /// Called by the router (or the circuit breaker, for rate-limit-shaped
    /// failures) whenever the backend itself signals a throttle.
    pub async fn record_throttle(&self, backend: BackendId) -> anyhow::Result<u32> {
        let now = Utc::now();
        let default_limit = self.default_limit_for(backend);
        let new_limit = self
            .doc
            .mutate(|state| {
                let entry = state.backends.entry(backend).or_insert_with(|| BackendGovernorState {
                    default_limit,
                    ..Default::default()
                });
                let window_start = now - Duration::minutes(WINDOW_MINUTES);
                let pre_count = entry.requests.iter().filter(|t| **t >= window_start).count() as u32;
                let new_limit = ((pre_count as f64 * THROTTLE_TIGHTEN_RATIO).floor() as u32).max(1);
                entry.current_limit = Some(new_limit);
                entry.cooldown_until = Some(now + Duration::minutes(THROTTLE_COOLDOWN_MINUTES));
                entry.throttle_events.push(now);
                entry.recent_failures += 1;
                new_limit
            })
            .await?;
        self.events.publish(router_types::RouterEvent::GovernorThrottled { backend, new_limit });
        Ok(new_limit)
    }

    pub async fn reset_backend(&self, backend: BackendId, limit: Option<u32>) -> anyhow::Result<()> {
        self.doc
            .mutate(|state| {
                let entry = state.backends.entry(backend).or_default();
                entry.current_limit = limit;
                entry.cooldown_until = None;
                entry.requests.clear();
            })
            .await?;
        Ok(())
    }

    pub async fn adjust_limit(&self, backend: BackendId, limit: u32) -> anyhow::Result<()> {
        self.doc
            .mutate(|state| {
                let entry = state.backends.entry(backend).or_default();
                entry.current_limit = Some(limit);
            })
            .await?;
        Ok(())
    }

    /// Surfaced to observability only; the `can_use` algorithm never
    /// consults these aggregates.
    pub async fn recommendations(&self) -> Vec<GovernorRecommendation> {
        let state = self.doc.get().await;
        state
            .backends
            .iter()
            .map(|(backend, entry)| {
                let mean_interval = mean_inter_throttle_minutes(&entry.throttle_events);
                let total = entry.recent_successes + entry.recent_failures;
                let success_rate = if total == 0 { 1.0 } else { entry.recent_successes as f64 / total as f64 };
                let effectiveness = success_rate - 20.0 * entry.throttle_events.len() as f64;
                GovernorRecommendation {
                    backend: *backend,
                    mean_inter_throttle_minutes: mean_interval,
                    effectiveness,
                }
            })
            .collect()
    }

    /// Consulted by shadow-bench to decide whether a subscription backend
    /// has enough spare capacity to also run a shadow task: allowed by
    /// `can_use` and recent usage below `idle_threshold` of its limit.
    pub async fn is_idle(&self, backend: BackendId, idle_threshold: f64) -> bool {
        if !self.can_use(backend).await.allowed {
            return false;
        }
        let default_limit = self.default_limit_for(backend);
        if default_limit == 0 {
            return true;
        }
        let now = Utc::now();
        let state = self.doc.get().await;
        let entry = state.backends.get(&backend).cloned().unwrap_or_default();
        let limit = entry.current_limit.unwrap_or(default_limit).max(1);
        let window_start = now - Duration::minutes(WINDOW_MINUTES);
        let in_window = entry.requests.iter().filter(|t| **t >= window_start).count() as u32;
        (in_window as f64) < idle_threshold * limit as f64
    }
}

#[async_trait::async_trait]
impl router_types::ShadowGovernorProbe for RateGovernor {
    async fn is_idle(&self, backend: BackendId, idle_threshold: f64) -> bool {
        RateGovernor::is_idle(self, backend, idle_threshold).await
    }
}

fn mean_inter_throttle_minutes(events: &[DateTime<Utc>]) -> Option<f64> {
    if events.len() < 2 {
        return None;
    }
    let mut sorted = events.to_vec();
    sorted.sort();
    let diffs: Vec<f64> = sorted.windows(2).map(|w| (w[1] - w[0]).num_seconds() as f64 / 60.0).collect();
    Some(diffs.iter().sum::<f64>() / diffs.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> BTreeMap<BackendId, u32> {
        let mut m = BTreeMap::new();
        m.insert(BackendId::ClaudeCode, 30);
        m.insert(BackendId::Codex, 30);
        m.insert(BackendId::Api, 30);
        m.insert(BackendId::Local, 0);
        m
    }

    #[tokio::test]
    async fn local_backend_is_unlimited() {
        let dir = tempfile::tempdir().unwrap();
        let governor = RateGovernor::open(dir.path().join("gov.json"), EventBus::new(), limits()).await.unwrap();
        let decision = governor.can_use(BackendId::Local).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn adaptive_tightening_matches_spec_example() {
        let dir = tempfile::tempdir().unwrap();
        let governor = RateGovernor::open(dir.path().join("gov.json"), EventBus::new(), limits()).await.unwrap();
        for _ in 0..12 {
            governor.record_request(BackendId::ClaudeCode).await.unwrap();
        }
        let new_limit = governor.record_throttle(BackendId::ClaudeCode).await.unwrap();
        assert_eq!(new_limit, 9);
        let decision = governor.can_use(BackendId::ClaudeCode).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn soft_limit_adds_delay_without_denying() {
        let dir = tempfile::tempdir().unwrap();
        let governor = RateGovernor::open(dir.path().join("gov.json"), EventBus::new(), limits()).await.unwrap();
        for _ in 0..25 {
            governor.record_request(BackendId::Codex).await.unwrap();
        }
        let decision = governor.can_use(BackendId::Codex).await;
        assert!(decision.allowed);
        assert_eq!(decision.delay_ms, Some(SOFT_LIMIT_DELAY_MS));
    }

    #[tokio::test]
    async fn is_idle_false_once_usage_crosses_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let governor = RateGovernor::open(dir.path().join("gov.json"), EventBus::new(), limits()).await.unwrap();
        assert!(governor.is_idle(BackendId::ClaudeCode, 0.5).await);
        for _ in 0..16 {
            governor.record_request(BackendId::ClaudeCode).await.unwrap();
        }
        assert!(!governor.is_idle(BackendId::ClaudeCode, 0.5).await);
    }
}
