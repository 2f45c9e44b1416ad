//! The subscription-backend dispatch queue. Distinct from the router's
//! per-step fallback path: this is the background scheduler that drains
//! tasks explicitly queued against a subscription backend (ClaudeCode,
//! Codex), respecting per-backend concurrency and cooldown windows.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use router_core::config::SchedulerConfig;
use router_core::{CircuitBreaker, EventBus, JsonDocument};
use router_providers::BackendRegistry;
use router_types::{BackendId, RouterEvent, Task};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_COMPLETED_CAPACITY: usize = 100;
const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "throttle", "quota"];
const BREAKER_MARKER: &str = "circuit breaker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Waiting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub task: Task,
    pub backend: BackendId,
    pub priority: u32,
    pub enqueued_at: DateTime<Utc>,
    pub retries: u32,
    pub circuit_breaker_failures: u32,
    pub last_error: Option<String>,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveItem {
    pub item: QueueItem,
    pub started_at: DateTime<Utc>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedItem {
    pub item: QueueItem,
    pub result: Option<String>,
    pub final_error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendHealth {
    pub throttled: bool,
    pub backoff_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerState {
    pub queue: Vec<QueueItem>,
    pub active: BTreeMap<String, ActiveItem>,
    pub completed: VecDeque<CompletedItem>,
    pub last_completion: BTreeMap<BackendId, DateTime<Utc>>,
    pub health: BTreeMap<BackendId, BackendHealth>,
    pub paused: bool,
}

fn sort_queue(queue: &mut [QueueItem]) {
    queue.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.enqueued_at.cmp(&b.enqueued_at)));
}

fn is_rate_limit_shaped(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn is_breaker_shaped(message: &str) -> bool {
    message.to_lowercase().contains(BREAKER_MARKER)
}

/// Drives the subscription queue: dispatch ticks, cancellation, and the
/// failure policy that decides retry vs dead-letter vs requeue-without-retry.
pub struct Scheduler {
    doc: JsonDocument<SchedulerState>,
    adapters: BackendRegistry,
    breaker: Arc<CircuitBreaker>,
    events: EventBus,
    config: SchedulerConfig,
}

impl Scheduler {
    pub async fn open(
        path: PathBuf,
        adapters: BackendRegistry,
        breaker: Arc<CircuitBreaker>,
        events: EventBus,
        config: SchedulerConfig,
    ) -> anyhow::Result<Self> {
        let doc = JsonDocument::open(path).await?;
        Ok(Self { doc, adapters, breaker, events, config })
    }

    pub async fn enqueue(&self, task: Task, backend: BackendId) -> String {
        let id = Uuid::new_v4().to_string();
        let priority = task.urgency.priority();
        let item = QueueItem {
            id: id.clone(),
            task,
            backend,
            priority,
            enqueued_at: Utc::now(),
            retries: 0,
            circuit_breaker_failures: 0,
            last_error: None,
            status: ItemStatus::Queued,
        };
        self.doc
            .mutate(|state| {
                state.queue.push(item);
                sort_queue(&mut state.queue);
            })
            .await
            .ok();
        id
    }

    /// Removes a queued item immediately, or flags an active one as
    /// cancelled so its result is dropped once the adapter returns.
    pub async fn cancel(&self, id: &str) -> anyhow::Result<bool> {
        self.doc
            .mutate(|state| {
                if let Some(pos) = state.queue.iter().position(|i| i.id == id) {
                    state.queue.remove(pos);
                    return true;
                }
                if let Some(active) = state.active.get_mut(id) {
                    active.cancelled = true;
                    return true;
                }
                false
            })
            .await
    }

    pub async fn pause(&self) -> anyhow::Result<()> {
        self.doc.mutate(|state| state.paused = true).await
    }

    pub async fn resume(&self) -> anyhow::Result<()> {
        self.doc.mutate(|state| state.paused = false).await
    }

    pub async fn snapshot(&self) -> SchedulerState {
        self.doc.get().await
    }

    /// One dispatch tick across every subscription backend. Intended to be
    /// called on a timer (default every 15s) by the process's warmup loop.
    pub async fn tick(&self) -> anyhow::Result<()> {
        if self.doc.get().await.paused {
            return Ok(());
        }
        for backend in BackendId::ALL.iter().copied().filter(|b| b.is_subscription()) {
            self.dispatch_backend(backend).await?;
        }
        Ok(())
    }

    async fn dispatch_backend(&self, backend: BackendId) -> anyhow::Result<()> {
        let now = Utc::now();
        let cooldown = Duration::minutes(*self.config.cooldowns_minutes.get(&backend).unwrap_or(&0));
        let concurrency = self.adapters.get(backend).map(|_| default_concurrency(backend)).unwrap_or(0);

        let picked = self
            .doc
            .mutate(|state| {
                let health = state.health.entry(backend).or_default();
                if let Some(until) = health.backoff_until {
                    if now < until {
                        return Vec::new();
                    }
                    health.throttled = false;
                    health.backoff_until = None;
                }

                if let Some(last) = state.last_completion.get(&backend) {
                    if now - *last < cooldown {
                        return Vec::new();
                    }
                }

                let active_count = state.active.values().filter(|a| a.item.backend == backend).count();
                let slots = concurrency.saturating_sub(active_count as u32);
                if slots == 0 {
                    return Vec::new();
                }

                sort_queue(&mut state.queue);
                let mut picked = Vec::new();
                let mut remaining = Vec::with_capacity(state.queue.len());
                for item in state.queue.drain(..) {
                    if item.backend == backend && (picked.len() as u32) < slots {
                        picked.push(item);
                    } else {
                        remaining.push(item);
                    }
                }
                state.queue = remaining;

                for item in &picked {
                    state.active.insert(
                        item.id.clone(),
                        ActiveItem { item: item.clone(), started_at: now, cancelled: false },
                    );
                }
                picked
            })
            .await?;

        for item in picked {
            self.execute_item(backend, item).await?;
        }
        Ok(())
    }

    async fn execute_item(&self, backend: BackendId, item: QueueItem) -> anyhow::Result<()> {
        if !self.breaker.can_execute(backend).await {
            self.handle_breaker_denied(item).await?;
            return Ok(());
        }

        let Some(adapter) = self.adapters.get(backend) else {
            self.finish(item, None, Some("no adapter registered".to_string())).await?;
            return Ok(());
        };

        let outcome = adapter.execute_task(&item.task, None).await;
        let cancelled = self
            .doc
            .get()
            .await
            .active
            .get(&item.id)
            .map(|a| a.cancelled)
            .unwrap_or(false);

        match outcome {
            Ok(result) => {
                let _ = self.breaker.record_success(backend).await;
                self.doc
                    .mutate(|state| {
                        state.last_completion.insert(backend, Utc::now());
                        if let Some(health) = state.health.get_mut(&backend) {
                            health.consecutive_failures = 0;
                        }
                    })
                    .await?;
                if cancelled {
                    self.drop_cancelled(&item.id).await?;
                } else {
                    self.finish(item, Some(result.response), None).await?;
                }
            }
            Err(err) => {
                let _ = self.breaker.record_failure(backend, false, err.is_rate_limit).await;
                if cancelled {
                    self.drop_cancelled(&item.id).await?;
                } else {
                    self.handle_failure(item, backend, err.message).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_failure(&self, mut item: QueueItem, backend: BackendId, message: String) -> anyhow::Result<()> {
        self.doc.mutate(|state| { state.active.remove(&item.id); }).await?;

        if is_rate_limit_shaped(&message) {
            let consecutive = self
                .doc
                .mutate(|state| {
                    let health = state.health.entry(backend).or_default();
                    health.throttled = true;
                    health.consecutive_failures += 1;
                    let minutes = 2i64.pow(health.consecutive_failures + 1);
                    health.backoff_until = Some(Utc::now() + Duration::minutes(minutes));
                    health.consecutive_failures
                })
                .await?;
            tracing::warn!(backend = %backend, consecutive, "rate-limit-shaped failure, backing off");
            item.last_error = Some(message);
            self.requeue(item).await?;
            return Ok(());
        }

        if is_breaker_shaped(&message) {
            return self.handle_breaker_denied_with_message(item, Some(message)).await;
        }

        item.retries += 1;
        item.last_error = Some(message.clone());
        if item.retries >= self.config.max_retries {
            self.finish(item, None, Some(message)).await?;
        } else {
            self.requeue(item).await?;
        }
        Ok(())
    }

    async fn handle_breaker_denied(&self, item: QueueItem) -> anyhow::Result<()> {
        self.doc.mutate(|state| { state.active.remove(&item.id); }).await?;
        self.handle_breaker_denied_with_message(item, None).await
    }

    async fn handle_breaker_denied_with_message(
        &self,
        mut item: QueueItem,
        message: Option<String>,
    ) -> anyhow::Result<()> {
        item.circuit_breaker_failures += 1;
        item.last_error = message.or(item.last_error);

        if item.circuit_breaker_failures >= self.config.max_consecutive_circuit_breaker_failures {
            let err = item.last_error.clone().unwrap_or_else(|| "circuit breaker denied".to_string());
            self.finish(item, None, Some(err)).await?;
            return Ok(());
        }

        let mut all_denied = true;
        for backend in BackendId::ALL.iter().copied().filter(|b| b.is_subscription()) {
            if self.breaker.can_execute(backend).await {
                all_denied = false;
                break;
            }
        }

        if all_denied {
            item.status = ItemStatus::Waiting;
            self.doc
                .mutate(|state| {
                    state.queue.push(item);
                    sort_queue(&mut state.queue);
                })
                .await?;
        } else {
            item.status = ItemStatus::Queued;
            self.requeue(item).await?;
        }
        Ok(())
    }

    async fn requeue(&self, item: QueueItem) -> anyhow::Result<()> {
        self.doc
            .mutate(|state| {
                state.active.remove(&item.id);
                state.queue.push(item);
                sort_queue(&mut state.queue);
            })
            .await
    }

    async fn drop_cancelled(&self, id: &str) -> anyhow::Result<()> {
        self.doc.mutate(|state| { state.active.remove(id); }).await
    }

    async fn finish(&self, item: QueueItem, result: Option<String>, final_error: Option<String>) -> anyhow::Result<()> {
        let backend = item.backend;
        let task_id = item.id.clone();
        let success = final_error.is_none();
        self.doc
            .mutate(|state| {
                state.active.remove(&item.id);
                state.completed.push_back(CompletedItem {
                    item,
                    result,
                    final_error,
                    completed_at: Utc::now(),
                });
                while state.completed.len() > DEFAULT_COMPLETED_CAPACITY {
                    state.completed.pop_front();
                }
            })
            .await?;
        self.events.publish(RouterEvent::StepCompleted {
            task_id,
            step_id: "scheduled".to_string(),
            backend,
            success,
        });
        Ok(())
    }
}

fn default_concurrency(backend: BackendId) -> u32 {
    match backend {
        BackendId::ClaudeCode => 1,
        BackendId::Codex => 3,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_core::CircuitBreaker;
    use router_providers::BackendRegistry;
    use router_types::Urgency;

    async fn scheduler_for_test() -> Scheduler {
        let dir = tempfile::tempdir().unwrap();
        let governor = Arc::new(
            router_core::RateGovernor::open(dir.path().join("gov.json"), EventBus::default(), Default::default())
                .await
                .unwrap(),
        );
        let breaker = Arc::new(
            CircuitBreaker::open(dir.path().join("breaker.json"), EventBus::default(), governor, Default::default())
                .await
                .unwrap(),
        );
        Scheduler::open(
            dir.path().join("queue.json"),
            BackendRegistry::new(vec![]),
            breaker,
            EventBus::default(),
            SchedulerConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn queue_orders_by_priority_then_enqueue_time() {
        let scheduler = scheduler_for_test().await;
        let mut background = Task::new("low priority");
        background.urgency = Urgency::Background;
        let mut urgent = Task::new("high priority");
        urgent.urgency = Urgency::Urgent;

        scheduler.enqueue(background, BackendId::ClaudeCode).await;
        scheduler.enqueue(urgent.clone(), BackendId::ClaudeCode).await;

        let snapshot = scheduler.snapshot().await;
        assert_eq!(snapshot.queue[0].task.description, "high priority");
    }

    #[tokio::test]
    async fn cancel_removes_queued_item() {
        let scheduler = scheduler_for_test().await;
        let id = scheduler.enqueue(Task::new("cancel me"), BackendId::ClaudeCode).await;
        assert!(scheduler.cancel(&id).await.unwrap());
        assert!(scheduler.snapshot().await.queue.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_message_is_detected() {
        assert!(is_rate_limit_shaped("Error: rate limit exceeded"));
        assert!(is_rate_limit_shaped("please slow down, quota reached"));
        assert!(!is_rate_limit_shaped("connection refused"));
    }

    #[tokio::test]
    async fn pause_blocks_dispatch_tick() {
        let scheduler = scheduler_for_test().await;
        scheduler.enqueue(Task::new("queued"), BackendId::ClaudeCode).await;
        scheduler.pause().await.unwrap();
        scheduler.tick().await.unwrap();
        let snapshot = scheduler.snapshot().await;
        assert_eq!(snapshot.queue.len(), 1);
        assert!(snapshot.active.is_empty());
    }
}
