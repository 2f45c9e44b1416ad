use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use router_types::{BackendId, RouterEvent};
use serde::{Deserialize, Serialize};

use crate::event_bus::EventBus;
use crate::rate_governor::RateGovernor;
use crate::storage::JsonDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendBreakerState {
    pub state_tag: Option<BreakerState>,
    pub failures: Vec<DateTime<Utc>>,
    pub cooldown_ends: Option<DateTime<Utc>>,
    pub probe_in_flight: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerStore {
    pub backends: BTreeMap<BackendId, BackendBreakerState>,
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window_minutes: i64,
    pub cooldown_minutes: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, failure_window_minutes: 15, cooldown_minutes: 10 }
    }
}

pub struct CircuitBreaker {
    doc: JsonDocument<BreakerStore>,
    events: EventBus,
    governor: Arc<RateGovernor>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub async fn open(
        path: PathBuf,
        events: EventBus,
        governor: Arc<RateGovernor>,
        config: CircuitBreakerConfig,
    ) -> anyhow::Result<Self> {
        let doc = JsonDocument::open(path).await?;
        Ok(Self { doc, events, governor, config })
    }

    fn current_state(&self, entry: &BackendBreakerState, now: DateTime<Utc>) -> BreakerState {
        match entry.state_tag {
            None | Some(BreakerState::Closed) => BreakerState::Closed,
            Some(BreakerState::Open) => {
                if entry.cooldown_ends.map(|c| now >= c).unwrap_or(true) {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            Some(BreakerState::HalfOpen) => BreakerState::HalfOpen,
        }
    }

    /// Returns whether a request may proceed. For HALF-OPEN this also
    /// claims the single allowed probe slot, so callers must follow up
    /// with `record_success`/`record_failure`.
    pub async fn can_execute(&self, backend: BackendId) -> bool {
        let now = Utc::now();
        let (allowed, entered_half_open) = self
            .doc
            .mutate(|store| {
                let entry = store.backends.entry(backend).or_default();
                let observed = self.current_state(entry, now);
                match observed {
                    BreakerState::Closed => (true, false),
                    BreakerState::Open => (false, false),
                    BreakerState::HalfOpen => {
                        let entered = entry.state_tag != Some(BreakerState::HalfOpen);
                        if entered {
                            entry.state_tag = Some(BreakerState::HalfOpen);
                            entry.probe_in_flight = false;
                        }
                        if entry.probe_in_flight {
                            (false, entered)
                        } else {
                            entry.probe_in_flight = true;
                            (true, entered)
                        }
                    }
                }
            })
            .await
            .unwrap_or((false, false));

        if entered_half_open {
            self.events.publish(RouterEvent::BreakerTransition { backend, state: "half_open".into() });
        }
        allowed
    }

    pub async fn record_success(&self, backend: BackendId) -> anyhow::Result<()> {
        let was_half_open = {
            let store = self.doc.get().await;
            store.backends.get(&backend).map(|e| e.state_tag == Some(BreakerState::HalfOpen)).unwrap_or(false)
        };
        self.doc
            .mutate(|store| {
                let entry = store.backends.entry(backend).or_default();
                entry.state_tag = Some(BreakerState::Closed);
                entry.failures.clear();
                entry.cooldown_ends = None;
                entry.probe_in_flight = false;
            })
            .await?;
        if was_half_open {
            self.events.publish(RouterEvent::BreakerTransition { backend, state: "closed".into() });
        }
        Ok(())
    }

    /// `is_probe` marks health-ping failures, which are noted but never
    /// count toward the failure threshold.
    pub async fn record_failure(&self, backend: BackendId, is_probe: bool, is_rate_limit: bool) -> anyhow::Result<()> {
        let now = Utc::now();
        let window = Duration::minutes(self.config.failure_window_minutes);
        let threshold = self.config.failure_threshold;
        let cooldown = Duration::minutes(self.config.cooldown_minutes);

        let transition = self
            .doc
            .mutate(|store| {
                let entry = store.backends.entry(backend).or_default();
                let was_half_open = entry.state_tag == Some(BreakerState::HalfOpen);
                entry.probe_in_flight = false;

                if was_half_open {
                    entry.state_tag = Some(BreakerState::Open);
                    entry.cooldown_ends = Some(now + cooldown);
                    return Some("open");
                }

                if is_probe {
                    return None;
                }

                entry.failures.push(now);
                entry.failures.retain(|t| now - *t <= window);

                if entry.failures.len() as u32 >= threshold {
                    entry.state_tag = Some(BreakerState::Open);
                    entry.cooldown_ends = Some(now + cooldown);
                    Some("open")
                } else {
                    None
                }
            })
            .await?;

        if let Some(state) = transition {
            self.events.publish(RouterEvent::BreakerTransition { backend, state: state.to_string() });
        }
        if is_rate_limit {
            self.governor.record_throttle(backend).await?;
        }
        Ok(())
    }

    pub async fn reset(&self, backend: BackendId) -> anyhow::Result<()> {
        self.doc
            .mutate(|store| {
                let entry = store.backends.entry(backend).or_default();
                entry.state_tag = Some(BreakerState::Closed);
                entry.failures.clear();
                entry.cooldown_ends = None;
                entry.probe_in_flight = false;
            })
            .await?;
        self.events.publish(RouterEvent::BreakerTransition { backend, state: "closed".into() });
        Ok(())
    }

    pub async fn is_open(&self, backend: BackendId) -> bool {
        let now = Utc::now();
        let store = self.doc.get().await;
        match store.backends.get(&backend) {
            Some(entry) => self.current_state(entry, now) == BreakerState::Open,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn breaker(dir: &std::path::Path) -> CircuitBreaker {
        let events = EventBus::new();
        let governor =
            Arc::new(RateGovernor::open(dir.join("gov.json"), events.clone(), BTreeMap::new()).await.unwrap());
        CircuitBreaker::open(dir.join("breaker.json"), events, governor, CircuitBreakerConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn five_failures_in_window_trips_open() {
        let dir = tempfile::tempdir().unwrap();
        let breaker = breaker(dir.path()).await;
        for _ in 0..5 {
            breaker.record_failure(BackendId::ClaudeCode, false, false).await.unwrap();
        }
        assert!(breaker.is_open(BackendId::ClaudeCode).await);
        assert!(!breaker.can_execute(BackendId::ClaudeCode).await);
    }

    #[tokio::test]
    async fn probe_failures_do_not_count_toward_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let breaker = breaker(dir.path()).await;
        for _ in 0..10 {
            breaker.record_failure(BackendId::Codex, true, false).await.unwrap();
        }
        assert!(!breaker.is_open(BackendId::Codex).await);
    }

    #[tokio::test]
    async fn half_open_allows_single_probe_only() {
        let dir = tempfile::tempdir().unwrap();
        let breaker = breaker(dir.path()).await;
        for _ in 0..5 {
            breaker.record_failure(BackendId::Api, false, false).await.unwrap();
        }
        // Force cooldown into the past so the next check flips to half-open.
        breaker
            .doc
            .mutate(|store| {
                let entry = store.backends.get_mut(&BackendId::Api).unwrap();
                entry.cooldown_ends = Some(Utc::now() - Duration::seconds(1));
            })
            .await
            .unwrap();

        assert!(breaker.can_execute(BackendId::Api).await);
        assert!(!breaker.can_execute(BackendId::Api).await);
    }

    #[tokio::test]
    async fn half_open_transition_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let events = EventBus::new();
        let governor =
            Arc::new(RateGovernor::open(dir.path().join("gov.json"), events.clone(), BTreeMap::new()).await.unwrap());
        let breaker = CircuitBreaker::open(dir.path().join("breaker.json"), events.clone(), governor, CircuitBreakerConfig::default())
            .await
            .unwrap();
        let mut rx = events.subscribe();
        for _ in 0..5 {
            breaker.record_failure(BackendId::ClaudeCode, false, false).await.unwrap();
        }
        breaker
            .doc
            .mutate(|store| {
                let entry = store.backends.get_mut(&BackendId::ClaudeCode).unwrap();
                entry.cooldown_ends = Some(Utc::now() - Duration::seconds(1));
            })
            .await
            .unwrap();

        assert!(breaker.can_execute(BackendId::ClaudeCode).await);

        let mut saw_half_open = false;
        while let Ok(timestamped) = rx.try_recv() {
            if let RouterEvent::BreakerTransition { state, .. } = timestamped.event {
                if state == "half_open" {
                    saw_half_open = true;
                }
            }
        }
        assert!(saw_half_open);
    }

    #[tokio::test]
    async fn success_after_half_open_closes_breaker() {
        let dir = tempfile::tempdir().unwrap();
        let breaker = breaker(dir.path()).await;
        for _ in 0..5 {
            breaker.record_failure(BackendId::Local, false, false).await.unwrap();
        }
        breaker
            .doc
            .mutate(|store| {
                let entry = store.backends.get_mut(&BackendId::Local).unwrap();
                entry.cooldown_ends = Some(Utc::now() - Duration::seconds(1));
            })
            .await
            .unwrap();
        assert!(breaker.can_execute(BackendId::Local).await);
        breaker.record_success(BackendId::Local).await.unwrap();
        assert!(breaker.can_execute(BackendId::Local).await);
        assert!(!breaker.is_open(BackendId::Local).await);
    }
}
