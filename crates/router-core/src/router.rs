use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use router_planner::Planner;
use router_providers::BackendRegistry;
use router_types::{
    BackendId, DedupStatus, ExecutionOutcome, Plan, RouterEvent, ShadowDispatcher, Step, Task, TaskType, TrustQuery,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::dedup::Dedup;
use crate::error::{RouterError, RouterErrorKind, RouterResult};
use crate::event_bus::EventBus;
use crate::health::HealthMonitor;
use crate::ledger::Ledger;
use crate::model_registry::select_model;
use crate::rate_governor::RateGovernor;
use crate::storage::JsonDocument;

const CONTEXT_CLIP_CHARS: usize = 500;
const MAX_SAME_BACKEND_RETRIES: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingPlanStore {
    pub plans: BTreeMap<String, Plan>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub plan_only: bool,
    pub pre_approved: bool,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    pub backend: BackendId,
    pub success: bool,
    pub response: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub plan_id: String,
    pub steps: Vec<StepResult>,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone)]
pub enum RouteOutcome {
    SelfHandle { reason: String },
    DedupSkip { existing_task_id: String },
    Plan(Plan),
    NeedsApproval { plan_id: String },
    Completed(TaskResult),
}

pub struct Router {
    planner: Planner,
    ledger: Ledger,
    governor: Arc<RateGovernor>,
    breaker: Arc<CircuitBreaker>,
    dedup: Dedup,
    health: HealthMonitor,
    adapters: BackendRegistry,
    events: EventBus,
    pending_plans: JsonDocument<PendingPlanStore>,
    shadow: Arc<dyn ShadowDispatcher>,
    trust: Arc<dyn TrustQuery>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        pending_plans_path: PathBuf,
        planner: Planner,
        ledger: Ledger,
        governor: Arc<RateGovernor>,
        breaker: Arc<CircuitBreaker>,
        dedup: Dedup,
        health: HealthMonitor,
        adapters: BackendRegistry,
        events: EventBus,
        shadow: Arc<dyn ShadowDispatcher>,
        trust: Arc<dyn TrustQuery>,
    ) -> anyhow::Result<Self> {
        let pending_plans = JsonDocument::open(pending_plans_path).await?;
        Ok(Self { planner, ledger, governor, breaker, dedup, health, adapters, events, pending_plans, shadow, trust })
    }

    pub async fn route(&self, task: Task, options: RouteOptions) -> RouterResult<RouteOutcome> {
        let task_id = Uuid::new_v4().to_string();

        let confidence = self.planner.assess_confidence(&task);
        if confidence.recommendation == router_planner::ConfidenceRecommendation::SelfHandle {
            return Ok(RouteOutcome::SelfHandle { reason: confidence.reason });
        }

        let dedup_outcome = self.dedup.check(&task.description).await;
        if dedup_outcome.recommendation == router_types::DedupRecommendation::Skip {
            let existing = dedup_outcome.existing_task_id.unwrap_or_default();
            self.events.publish(RouterEvent::DedupSkipped { task_id, existing_task_id: existing.clone() });
            return Ok(RouteOutcome::DedupSkip { existing_task_id: existing });
        }

        let plan = self.planner.decompose(&task);
        if options.plan_only {
            return Ok(RouteOutcome::Plan(plan));
        }

        if plan.needs_approval && !options.pre_approved {
            self.pending_plans
                .mutate(|store| {
                    store.plans.insert(plan.id.clone(), plan.clone());
                })
                .await
                .map_err(|e| RouterError::fatal(e.to_string()))?;
            self.events
                .publish(RouterEvent::PlanAwaitingApproval { plan_id: plan.id.clone(), total_api_cost: plan.total_api_cost });
            return Ok(RouteOutcome::NeedsApproval { plan_id: plan.id.clone() });
        }

        self.dedup
            .register(&task_id, &task.description)
            .await
            .map_err(|e| RouterError::fatal(e.to_string()))?;
        self.dedup.mark_status(&task_id, DedupStatus::Running).await.ok();
        self.events.publish(RouterEvent::TaskStarted { task_id: task_id.clone(), description: task.description.clone() });

        let result = self.execute_plan(&task_id, &task, &plan).await;

        let final_status = if result.steps.iter().all(|s| s.success) { DedupStatus::Done } else { DedupStatus::Failed };
        self.dedup.mark_status(&task_id, final_status).await.ok();

        Ok(RouteOutcome::Completed(result))
    }

    async fn execute_plan(&self, task_id: &str, task: &Task, plan: &Plan) -> TaskResult {
        let mut outputs: BTreeMap<String, String> = BTreeMap::new();
        let mut results = Vec::with_capacity(plan.steps.len());
        let mut total_cost = 0.0;

        for step in &plan.steps {
            self.events.publish(RouterEvent::StepDispatched {
                task_id: task_id.to_string(),
                step_id: step.id.clone(),
                backend: step.backend,
            });

            let context = bounded_context(step, &outputs);
            let step_result = self.execute_step(task, step, &context).await;

            if let Some(outcome) = &step_result.1 {
                total_cost += outcome.cost_usd;
                outputs.insert(step.id.clone(), outcome.response.clone());
                self.shadow.dispatch(
                    task_id,
                    task.task_type.unwrap_or(TaskType::Other),
                    &task.description,
                    task.complexity.unwrap_or(0),
                    outcome,
                );
            }

            self.events.publish(RouterEvent::StepCompleted {
                task_id: task_id.to_string(),
                step_id: step.id.clone(),
                backend: step_result.0.backend,
                success: step_result.0.success,
            });

            let critical_failed = step.critical && !step_result.0.success;
            results.push(step_result.0);
            if critical_failed {
                break;
            }
        }

        TaskResult { plan_id: plan.id.clone(), steps: results, total_cost_usd: total_cost }
    }

    async fn execute_step(&self, task: &Task, step: &Step, context: &str) -> (StepResult, Option<ExecutionOutcome>) {
        let augmented_description =
            if context.is_empty() { task.description.clone() } else { format!("{}\n\ncontext:\n{context}", task.description) };
        let mut augmented = task.clone();
        augmented.description = augmented_description;

        let mut backend = step.backend;
        let mut same_backend_retries = 0u32;

        loop {
            match self.gate(backend, step.estimated_tokens).await {
                Ok(GateDecision::Proceed) => {}
                Ok(GateDecision::Delay(ms)) => {
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                }
                Err(_denied) => {
                    if let Some(next) = self.next_fallback(backend, step.critical).await {
                        backend = next;
                        continue;
                    }
                    return (
                        StepResult {
                            step_id: step.id.clone(),
                            backend,
                            success: false,
                            response: String::new(),
                            error: Some("all fallback backends denied".to_string()),
                        },
                        None,
                    );
                }
            }

            let model = if backend == BackendId::Api {
                let task_type = task.task_type.unwrap_or(TaskType::Other);
                let complexity = task.complexity.unwrap_or(5);
                let trusted = self.trust.trusted_models(task_type, complexity).await;
                select_model(task_type, complexity, step.estimated_tokens, &trusted).map(|m| m.model_id)
            } else {
                None
            };

            let adapter = match self.adapters.get(backend) {
                Some(a) => a,
                None => {
                    return (
                        StepResult {
                            step_id: step.id.clone(),
                            backend,
                            success: false,
                            response: String::new(),
                            error: Some(format!("no adapter registered for {backend}")),
                        },
                        None,
                    )
                }
            };

            let _ = self.governor.record_request(backend).await;
            match adapter.execute_task(&augmented, model.as_deref()).await {
                Ok(outcome) => {
                    let _ = self.ledger.record_usage(backend, outcome.tokens, outcome.cost_usd, &task.user_id).await;
                    let _ = self.breaker.record_success(backend).await;
                    let _ = self.governor.record_success(backend).await;
                    return (
                        StepResult {
                            step_id: step.id.clone(),
                            backend,
                            success: true,
                            response: outcome.response.clone(),
                            error: None,
                        },
                        Some(outcome),
                    );
                }
                Err(err) => {
                    let _ = self.breaker.record_failure(backend, false, err.is_rate_limit).await;

                    if !err.should_fallback || same_backend_retries >= MAX_SAME_BACKEND_RETRIES {
                        if let Some(next) = self.next_fallback(backend, step.critical).await {
                            backend = next;
                            same_backend_retries = 0;
                            continue;
                        }
                        return (
                            StepResult {
                                step_id: step.id.clone(),
                                backend,
                                success: false,
                                response: String::new(),
                                error: Some(err.message),
                            },
                            None,
                        );
                    }
                    same_backend_retries += 1;
                }
            }
        }
    }

    async fn gate(&self, backend: BackendId, estimated_tokens: u64) -> Result<GateDecision, ()> {
        let budget = self.ledger.check_budget(backend, estimated_tokens).await;
        if !budget.allowed {
            return Err(());
        }
        let governed = self.governor.can_use(backend).await;
        if !governed.allowed {
            return Err(());
        }
        if !self.breaker.can_execute(backend).await {
            return Err(());
        }
        if self.health.status_for(backend).await == router_types::HealthStatus::Dead {
            return Err(());
        }
        Ok(governed.delay_ms.map(GateDecision::Delay).unwrap_or(GateDecision::Proceed))
    }

    /// Picks the next backend in the critical-path fallback chain, broken
    /// by health score when more than one candidate remains so a dead
    /// backend further down the chain doesn't get tried before a live one.
    async fn next_fallback(&self, backend: BackendId, critical: bool) -> Option<BackendId> {
        if !critical {
            return None;
        }
        const CHAIN: [BackendId; 3] = [BackendId::ClaudeCode, BackendId::Api, BackendId::Local];
        let idx = CHAIN.iter().position(|b| *b == backend)?;
        let mut best: Option<(BackendId, u32)> = None;
        for &candidate in &CHAIN[idx + 1..] {
            let score = self.health.status_for(candidate).await.score();
            if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
                best = Some((candidate, score));
            }
        }
        best.map(|(candidate, _)| candidate)
    }

    pub async fn health_of(&self, backend: BackendId) -> router_types::HealthStatus {
        self.health.status_for(backend).await
    }

    pub async fn ledger_report(&self) -> router_types::LedgerReport {
        self.ledger.get_report().await
    }

    pub async fn pending_plans(&self) -> BTreeMap<String, Plan> {
        self.pending_plans.get().await.plans
    }

    pub async fn approve_pending_plan(&self, task: Task, plan_id: &str) -> RouterResult<RouteOutcome> {
        let exists = self.pending_plans.get().await.plans.contains_key(plan_id);
        if !exists {
            return Err(RouterError::fatal(format!("no pending plan with id {plan_id}")));
        }
        self.pending_plans.mutate(|store| store.plans.remove(plan_id)).await.map_err(|e| RouterError::fatal(e.to_string()))?;
        self.route(task, RouteOptions { plan_only: false, pre_approved: true }).await
    }

    pub fn error_for_kind(kind: RouterErrorKind, message: impl Into<String>) -> RouterError {
        RouterError { kind, backend: None, message: message.into() }
    }
}

enum GateDecision {
    Proceed,
    Delay(u64),
}

fn bounded_context(step: &Step, outputs: &BTreeMap<String, String>) -> String {
    step.dependencies
        .iter()
        .filter_map(|dep| outputs.get(dep))
        .map(|output| clip(output, CONTEXT_CLIP_CHARS))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as StdBTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use router_providers::{BackendAdapter, SessionStatus};
    use router_types::{AdapterError, NoopTrustQuery};

    struct StubAdapter(BackendId);

    #[async_trait]
    impl BackendAdapter for StubAdapter {
        fn backend(&self) -> BackendId {
            self.0
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn session_status(&self) -> SessionStatus {
            SessionStatus { session_percent_used: 0.0, is_authenticated: true }
        }
        async fn execute_task(&self, task: &Task, _model: Option<&str>) -> Result<ExecutionOutcome, AdapterError> {
            Ok(ExecutionOutcome {
                success: true,
                backend: self.0,
                model: "local-stub".to_string(),
                response: format!("handled: {}", task.description),
                duration_ms: 5,
                tokens: 100,
                cost_usd: 0.0,
                output_path: None,
            })
        }
    }

    struct CountingShadowDispatcher(AtomicUsize);

    impl ShadowDispatcher for CountingShadowDispatcher {
        fn dispatch(&self, _task_id: &str, _task_type: TaskType, _description: &str, _complexity: u8, _primary: &ExecutionOutcome) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn build_router(
        dir: &std::path::Path,
        shadow: Arc<dyn ShadowDispatcher>,
    ) -> Router {
        let events = EventBus::new();
        let governor = Arc::new(RateGovernor::open(dir.join("gov.json"), events.clone(), StdBTreeMap::new()).await.unwrap());
        let breaker = Arc::new(
            CircuitBreaker::open(dir.join("breaker.json"), events.clone(), Arc::clone(&governor), Default::default())
                .await
                .unwrap(),
        );
        let adapters = BackendRegistry::new(vec![Arc::new(StubAdapter(BackendId::Local))]);
        let health = HealthMonitor::open(dir.join("health.json"), adapters.clone(), Arc::clone(&breaker)).await.unwrap();
        Router::new(
            dir.join("pending-plans.json"),
            Planner::new(),
            Ledger::open(dir.join("ledger.json"), 25.0, 500.0).await.unwrap(),
            governor,
            breaker,
            Dedup::open(dir.join("dedup.json")).await.unwrap(),
            health,
            adapters,
            events,
            shadow,
            Arc::new(NoopTrustQuery),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn short_question_is_self_handled_without_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = Arc::new(CountingShadowDispatcher(AtomicUsize::new(0)));
        let router = build_router(dir.path(), shadow.clone()).await;

        let task = Task::new("remind me what time it is?");
        let outcome = router.route(task, RouteOptions::default()).await.unwrap();

        assert!(matches!(outcome, RouteOutcome::SelfHandle { .. }));
        assert_eq!(shadow.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expensive_plan_requires_approval_then_completes() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = Arc::new(CountingShadowDispatcher(AtomicUsize::new(0)));
        let router = build_router(dir.path(), shadow.clone()).await;

        let mut task = Task::new(
            "Analyze entire codebase using API for comprehensive security audit of every module, then write a thorough report and organize the output directory structure".repeat(2),
        );
        task.files = (0..20).map(|i| format!("file{i}.rs")).collect();
        task.tools_needed.insert("web".to_string());

        let outcome = router.route(task.clone(), RouteOptions::default()).await.unwrap();
        let RouteOutcome::NeedsApproval { plan_id } = outcome else {
            panic!("expected NeedsApproval, got {outcome:?}");
        };

        let pending = router.pending_plans().await;
        assert!(pending.contains_key(&plan_id));

        let approved = router.approve_pending_plan(task, &plan_id).await.unwrap();
        assert!(matches!(approved, RouteOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn forced_backend_executes_and_triggers_shadow_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = Arc::new(CountingShadowDispatcher(AtomicUsize::new(0)));
        let router = build_router(dir.path(), shadow.clone()).await;

        let mut task = Task::new("Write a hello world");
        task.complexity = Some(2);
        task.force_backend = Some(BackendId::Local);

        let outcome = router.route(task, RouteOptions::default()).await.unwrap();
        let RouteOutcome::Completed(result) = outcome else {
            panic!("expected Completed, got {outcome:?}");
        };

        assert!(result.steps.iter().all(|s| s.success));
        assert_eq!(shadow.0.load(Ordering::SeqCst), result.steps.len());
    }
}
