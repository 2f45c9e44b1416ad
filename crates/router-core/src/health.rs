use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use router_providers::BackendRegistry;
use router_types::{BackendHealthRecord, BackendId, HealthStatus};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreaker;
use crate::storage::JsonDocument;

pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15 * 60;
const WARM_WINDOW_MINUTES: i64 = 5;
const HEALTHY_WINDOW_MINUTES: i64 = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStore {
    pub backends: BTreeMap<BackendId, BackendHealthRecord>,
}

pub struct HealthMonitor {
    doc: JsonDocument<HealthStore>,
    registry: BackendRegistry,
    breaker: Arc<CircuitBreaker>,
}

impl HealthMonitor {
    pub async fn open(path: PathBuf, registry: BackendRegistry, breaker: Arc<CircuitBreaker>) -> anyhow::Result<Self> {
        let doc = JsonDocument::open(path).await?;
        Ok(Self { doc, registry, breaker })
    }

    /// Probes every known backend once. Intended to be called on a timer
    /// by the caller (the scheduler's warmup loop); not self-scheduling.
    pub async fn probe_all(&self) -> anyhow::Result<()> {
        for backend in BackendId::ALL {
            self.probe_one(backend).await?;
        }
        Ok(())
    }

    pub async fn probe_one(&self, backend: BackendId) -> anyhow::Result<HealthStatus> {
        let now = Utc::now();
        let available = match self.registry.get(backend) {
            Some(adapter) => adapter.is_available().await,
            None => false,
        };

        self.doc
            .mutate(|store| {
                let record = store.backends.entry(backend).or_default();
                record.last_ping = Some(now);
                if available {
                    record.last_success = Some(now);
                    record.last_error = None;
                    record.consecutive_failures = 0;
                } else {
                    record.last_error = Some("liveness probe failed".to_string());
                    record.consecutive_failures += 1;
                }
            })
            .await?;

        if !available {
            self.breaker.record_failure(backend, true, false).await?;
        }

        Ok(self.status_for(backend).await)
    }

    pub async fn status_for(&self, backend: BackendId) -> HealthStatus {
        let store = self.doc.get().await;
        let record = store.backends.get(&backend).cloned().unwrap_or_default();
        derive_status(&record, Utc::now())
    }

    pub async fn record_for(&self, backend: BackendId) -> BackendHealthRecord {
        self.doc.get().await.backends.get(&backend).cloned().unwrap_or_default()
    }
}

fn derive_status(record: &BackendHealthRecord, now: chrono::DateTime<Utc>) -> HealthStatus {
    if record.consecutive_failures >= 1 {
        return HealthStatus::Dead;
    }
    match record.last_success {
        Some(last) if now - last <= Duration::minutes(WARM_WINDOW_MINUTES) => HealthStatus::Warm,
        Some(last) if now - last <= Duration::minutes(HEALTHY_WINDOW_MINUTES) => HealthStatus::Healthy,
        _ => HealthStatus::Cold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_success_is_warm() {
        let record = BackendHealthRecord { last_success: Some(Utc::now()), ..Default::default() };
        assert_eq!(derive_status(&record, Utc::now()), HealthStatus::Warm);
    }

    #[test]
    fn stale_success_is_cold() {
        let record =
            BackendHealthRecord { last_success: Some(Utc::now() - Duration::hours(2)), ..Default::default() };
        assert_eq!(derive_status(&record, Utc::now()), HealthStatus::Cold);
    }

    #[test]
    fn any_consecutive_failure_is_dead() {
        let record = BackendHealthRecord {
            last_success: Some(Utc::now()),
            consecutive_failures: 1,
            ..Default::default()
        };
        assert_eq!(derive_status(&record, Utc::now()), HealthStatus::Dead);
    }

    #[test]
    fn score_ordering_matches_spec() {
        assert!(HealthStatus::Warm.score() > HealthStatus::Healthy.score());
        assert!(HealthStatus::Healthy.score() > HealthStatus::Cold.score());
        assert!(HealthStatus::Cold.score() > HealthStatus::Dead.score());
    }
}
