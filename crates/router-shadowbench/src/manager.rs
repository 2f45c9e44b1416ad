//! Fire-and-forget shadow dispatch. A clonable handle over a shared
//! inner state, mirroring the registry/manager shape used for the
//! scheduler's MCP and PTY handles: cheap to clone, safe to hand to
//! multiple callers, and implements the router-facing traits directly
//! so neither side needs to depend on the other's crate.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use router_observability::{emit_event, ObservabilityEvent, ProcessKind};
use router_providers::BackendRegistry;
use router_types::{
    BackendId, DifficultyBand, ExecutionOutcome, ExecutionRecord, RouterEvent, ShadowDispatcher, ShadowEventSink,
    ShadowGovernorProbe, ShadowResult, Task, TaskType, TrustQuery, TrustScore, TrustTrend,
};
use tokio::sync::Semaphore;
use tracing::Level;
use uuid::Uuid;

use crate::db::ShadowDb;
use crate::scoring::{code_parses, composite_score, key_term_jaccard, length_ratio, structure_ratio};
use crate::types::ShadowBenchResult;

/// Score/sample thresholds gating a model's inclusion in the router's
/// trusted candidate set. Not given exact values externally; chosen
/// conservatively so a handful of lucky shadow runs can't promote a model.
const TRUSTED_SCORE_THRESHOLD: f64 = 0.75;
const TRUSTED_MIN_SAMPLES: u64 = 10;

const TRUST_USER_WEIGHT: f64 = 3.0;
const TRUST_AUTO_WEIGHT: f64 = 1.0;
const ALL_BAND: &str = "all";

struct Inner {
    db: ShadowDb,
    adapters: BackendRegistry,
    governor: Arc<dyn ShadowGovernorProbe>,
    events: Arc<dyn ShadowEventSink>,
    idle_threshold: f64,
    permits: Arc<Semaphore>,
    trusted_threshold: f64,
    trusted_min_samples: u64,
}

#[derive(Clone)]
pub struct ShadowBenchManager(Arc<Inner>);

impl ShadowBenchManager {
    pub async fn open(
        db_path: &Path,
        adapters: BackendRegistry,
        governor: Arc<dyn ShadowGovernorProbe>,
        events: Arc<dyn ShadowEventSink>,
        idle_threshold: f64,
        max_concurrent_shadows: usize,
    ) -> ShadowBenchResult<Self> {
        let db = ShadowDb::open(db_path).await?;
        Ok(Self(Arc::new(Inner {
            db,
            adapters,
            governor,
            events,
            idle_threshold,
            permits: Arc::new(Semaphore::new(max_concurrent_shadows.max(1))),
            trusted_threshold: TRUSTED_SCORE_THRESHOLD,
            trusted_min_samples: TRUSTED_MIN_SAMPLES,
        })))
    }

    /// `Local` always shadows; the subscription backends join in only when
    /// both the rate governor and the adapter itself report spare capacity.
    async fn shadow_set(&self, primary_backend: BackendId) -> Vec<BackendId> {
        let mut out = Vec::new();
        for backend in BackendId::ALL {
            if backend == primary_backend {
                continue;
            }
            if backend == BackendId::Local {
                out.push(backend);
                continue;
            }
            if !backend.is_subscription() {
                continue;
            }
            if !self.0.governor.is_idle(backend, self.0.idle_threshold).await {
                continue;
            }
            if let Some(adapter) = self.0.adapters.get(backend) {
                if adapter.session_status().await.session_percent_used < self.0.idle_threshold {
                    out.push(backend);
                }
            }
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_shadow(
        inner: Arc<Inner>,
        task_id: String,
        task_type: TaskType,
        description: String,
        complexity: u8,
        primary: ExecutionOutcome,
        backend: BackendId,
    ) {
        let Ok(_permit) = Arc::clone(&inner.permits).try_acquire_owned() else {
            return;
        };

        let Some(adapter) = inner.adapters.get(backend) else { return };

        let task = Task::new(description.clone());
        let outcome = match adapter.execute_task(&task, None).await {
            Ok(outcome) => outcome,
            Err(err) => {
                emit_event(
                    Level::WARN,
                    ProcessKind::Engine,
                    ObservabilityEvent {
                        event: "shadow_failed",
                        component: "shadowbench",
                        correlation_id: None,
                        task_id: Some(&task_id),
                        plan_id: None,
                        step_id: None,
                        backend: Some(backend.as_str()),
                        model: None,
                        status: Some("error"),
                        error_code: None,
                        detail: Some(&err.message),
                    },
                );
                return;
            }
        };

        let length_similarity = length_ratio(primary.response.len(), outcome.response.len());
        let structure_similarity = structure_ratio(&primary.response, &outcome.response);
        let key_term_overlap = key_term_jaccard(&primary.response, &outcome.response);
        let parses = code_parses(primary.output_path.as_deref(), &outcome.response);
        let auto_score =
            composite_score(length_similarity, structure_similarity, key_term_overlap, parses, &outcome.response);

        let band = if complexity > 0 {
            DifficultyBand::from_complexity(complexity)
        } else {
            DifficultyBand::from_description_len(description.len())
        };
        let result = ShadowResult {
            id: Uuid::new_v4().to_string(),
            primary_task_id: task_id.clone(),
            task_type: task_type_str(task_type).to_string(),
            description,
            primary: to_record(&primary),
            shadow: to_record(&outcome),
            auto_score,
            user_score: None,
            length_similarity,
            structure_similarity,
            key_term_overlap,
            code_parses: parses,
            difficulty_band: band,
            created_at: Utc::now(),
        };

        if let Err(err) = inner.db.insert_result(&result).await {
            tracing::warn!(error = %err, "failed to persist shadow result");
            return;
        }

        for target_band in [band.as_str(), ALL_BAND] {
            if let Err(err) =
                update_trust(&inner, &outcome.model, task_type_str(task_type), target_band, auto_score, TRUST_AUTO_WEIGHT).await
            {
                tracing::warn!(error = %err, band = target_band, "failed to update trust score");
            }
        }

        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "shadow_completed",
                component: "shadowbench",
                correlation_id: None,
                task_id: Some(&task_id),
                plan_id: None,
                step_id: None,
                backend: Some(backend.as_str()),
                model: Some(&outcome.model),
                status: Some("scored"),
                error_code: None,
                detail: None,
            },
        );
    }

    /// Records user feedback on a previously persisted shadow result and
    /// folds it into that model's trust score at the heavier user weight.
    pub async fn record_feedback(
        &self,
        shadow_id: &str,
        model: &str,
        task_type: &str,
        band: &str,
        score: f64,
        comment: Option<&str>,
    ) -> ShadowBenchResult<()> {
        self.0.db.record_feedback(shadow_id, score, comment).await?;
        for target_band in [band, ALL_BAND] {
            update_trust(&self.0, model, task_type, target_band, score, TRUST_USER_WEIGHT).await?;
        }
        Ok(())
    }
}

/// `None` for the `"all"` rollup row, which has no single difficulty band
/// to promote/demote against.
fn parse_band(band: &str) -> Option<DifficultyBand> {
    match band {
        "easy" => Some(DifficultyBand::Easy),
        "medium" => Some(DifficultyBand::Medium),
        "hard" => Some(DifficultyBand::Hard),
        _ => None,
    }
}

async fn update_trust(
    inner: &Inner,
    model: &str,
    task_type: &str,
    band: &str,
    new_value: f64,
    weight: f64,
) -> ShadowBenchResult<()> {
    let existing = inner.db.get_trust_score(model, task_type, band).await?;
    let (score, samples, total_weight) = match &existing {
        Some(prev) => {
            let total_weight = prev.total_weight + weight;
            let score = (prev.score * prev.total_weight + new_value * weight) / total_weight;
            (score, prev.samples + 1, total_weight)
        }
        None => (new_value, 1, weight),
    };

    let trend = match &existing {
        Some(prev) if score > prev.score + 0.02 => TrustTrend::Rising,
        Some(prev) if score < prev.score - 0.02 => TrustTrend::Falling,
        _ => TrustTrend::Stable,
    };

    let updated = TrustScore {
        model: model.to_string(),
        task_type: task_type.to_string(),
        band: band.to_string(),
        score,
        samples,
        total_weight,
        trend,
        backends: existing.as_ref().map(|e| e.backends.clone()).unwrap_or_default(),
        last_updated: Utc::now(),
    };
    inner.db.upsert_trust_score(&updated).await?;

    if let Some(difficulty_band) = parse_band(band) {
        let was_trusted = existing
            .as_ref()
            .map(|prev| prev.samples >= inner.trusted_min_samples && prev.score >= inner.trusted_threshold)
            .unwrap_or(false);
        let is_trusted = samples >= inner.trusted_min_samples && score >= inner.trusted_threshold;

        if is_trusted != was_trusted {
            let status = if is_trusted { "promoted" } else { "demoted" };
            inner
                .db
                .insert_promotion(&Uuid::new_v4().to_string(), model, task_type, difficulty_band, score, 0.0, status)
                .await?;
            inner.events.publish(RouterEvent::ModelPromotion {
                model: model.to_string(),
                task_type: task_type.to_string(),
                difficulty_band: difficulty_band.as_str().to_string(),
                trust_score: score,
                status: status.to_string(),
            });
        }
    }

    Ok(())
}

fn to_record(outcome: &ExecutionOutcome) -> ExecutionRecord {
    ExecutionRecord {
        backend: outcome.backend,
        model: outcome.model.clone(),
        duration_ms: outcome.duration_ms,
        tokens: outcome.tokens,
        cost_usd: outcome.cost_usd,
        output_length: outcome.response.len(),
        output_hash: router_observability::short_hash(&outcome.response),
        success: outcome.success,
    }
}

fn task_type_str(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Code => "code",
        TaskType::Review => "review",
        TaskType::Analysis => "analysis",
        TaskType::Research => "research",
        TaskType::Writing => "writing",
        TaskType::FileOps => "file-ops",
        TaskType::Docs => "docs",
        TaskType::Testing => "testing",
        TaskType::Other => "other",
    }
}

impl ShadowDispatcher for ShadowBenchManager {
    fn dispatch(&self, task_id: &str, task_type: TaskType, description: &str, complexity: u8, primary: &ExecutionOutcome) {
        let inner = Arc::clone(&self.0);
        let task_id = task_id.to_string();
        let description = description.to_string();
        let primary = primary.clone();

        tokio::spawn(async move {
            let manager = ShadowBenchManager(Arc::clone(&inner));
            let targets = manager.shadow_set(primary.backend).await;
            for backend in targets {
                let inner = Arc::clone(&inner);
                let task_id = task_id.clone();
                let description = description.clone();
                let primary = primary.clone();
                tokio::spawn(async move {
                    ShadowBenchManager::run_shadow(inner, task_id, task_type, description, complexity, primary, backend)
                        .await;
                });
            }
        });
    }
}

#[async_trait]
impl TrustQuery for ShadowBenchManager {
    async fn trusted_models(&self, task_type: TaskType, complexity: u8) -> BTreeSet<String> {
        let band = DifficultyBand::from_complexity(complexity);
        self.0
            .db
            .trusted_models(task_type_str(task_type), band.as_str(), self.0.trusted_threshold, self.0.trusted_min_samples)
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_providers::SessionStatus;
    use router_types::{AdapterError, Task as RouterTask};

    struct AlwaysIdle;

    #[async_trait]
    impl ShadowGovernorProbe for AlwaysIdle {
        async fn is_idle(&self, _backend: BackendId, _idle_threshold: f64) -> bool {
            true
        }
    }

    struct StubAdapter(BackendId);

    #[async_trait]
    impl router_providers::BackendAdapter for StubAdapter {
        fn backend(&self) -> BackendId {
            self.0
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn session_status(&self) -> SessionStatus {
            SessionStatus { session_percent_used: 0.1, is_authenticated: true }
        }
        async fn execute_task(&self, _task: &RouterTask, _model: Option<&str>) -> Result<ExecutionOutcome, AdapterError> {
            Ok(ExecutionOutcome {
                success: true,
                backend: self.0,
                model: "local-1".to_string(),
                response: "fn main() { println!(\"ok\"); }".to_string(),
                duration_ms: 50,
                tokens: 20,
                cost_usd: 0.0,
                output_path: None,
            })
        }
    }

    fn primary_outcome() -> ExecutionOutcome {
        ExecutionOutcome {
            success: true,
            backend: BackendId::ClaudeCode,
            model: "claude".to_string(),
            response: "fn main() { println!(\"ok\"); }".to_string(),
            duration_ms: 80,
            tokens: 25,
            cost_usd: 0.0,
            output_path: None,
        }
    }

    #[tokio::test]
    async fn shadow_set_always_includes_local_and_excludes_primary() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = BackendRegistry::new(vec![Arc::new(StubAdapter(BackendId::Local))]);
        let manager =
            ShadowBenchManager::open(
                &dir.path().join("bench.db"),
                adapters,
                Arc::new(AlwaysIdle),
                Arc::new(router_types::NoopShadowEventSink),
                0.5,
                2,
            )
            .await
            .unwrap();

        let targets = manager.shadow_set(BackendId::ClaudeCode).await;
        assert!(targets.contains(&BackendId::Local));
        assert!(!targets.contains(&BackendId::ClaudeCode));
    }

    #[tokio::test]
    async fn trusted_models_empty_before_any_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = BackendRegistry::new(vec![]);
        let manager =
            ShadowBenchManager::open(
                &dir.path().join("bench.db"),
                adapters,
                Arc::new(AlwaysIdle),
                Arc::new(router_types::NoopShadowEventSink),
                0.5,
                2,
            )
            .await
            .unwrap();

        let trusted = manager.trusted_models(TaskType::Code, 5).await;
        assert!(trusted.is_empty());
    }

    #[tokio::test]
    async fn run_shadow_persists_result_and_raises_trust_score() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = BackendRegistry::new(vec![Arc::new(StubAdapter(BackendId::Local))]);
        let manager =
            ShadowBenchManager::open(
                &dir.path().join("bench.db"),
                adapters,
                Arc::new(AlwaysIdle),
                Arc::new(router_types::NoopShadowEventSink),
                0.5,
                2,
            )
            .await
            .unwrap();

        ShadowBenchManager::run_shadow(
            Arc::clone(&manager.0),
            "task-1".to_string(),
            TaskType::Code,
            "refactor the parser module".to_string(),
            0,
            primary_outcome(),
            BackendId::Local,
        )
        .await;

        let score = manager.0.db.get_trust_score("local-1", "code", "all").await.unwrap();
        assert!(score.is_some());
    }
}
