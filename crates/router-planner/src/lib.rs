//! Decomposes a task into a dependency-ordered plan, estimates its cost,
//! and scores the router's confidence in handling it without dispatching
//! to any backend at all.

mod complexity;
mod cost;
mod decompose;

pub use complexity::{assess_confidence, infer_complexity, ConfidenceAssessment, ConfidenceRecommendation};
pub use cost::{critical_path_minutes, estimate_dollar_cost, estimate_tokens, summarize, CostBreakdown};
pub use decompose::{scan_step_types, select_backend};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use router_types::{Plan, Step, StepType, Task};
use uuid::Uuid;

static PLAN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_plan_id() -> String {
    let seq = PLAN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("plan-{seq}-{}", &suffix[..8])
}

const SHORT_TASK_CHARS: usize = 200;
const SHORT_TASK_MAX_COMPLEXITY: u8 = 3;
const SHORT_TASK_MAX_FILES: usize = 2;
const APPROVAL_THRESHOLD_USD: f64 = 2.00;

#[derive(Debug, Default, Clone, Copy)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// `decompose(task) -> plan`. Cannot fail: callers always get a valid
    /// plan with at least one step.
    pub fn decompose(&self, task: &Task) -> Plan {
        let complexity = task.complexity.unwrap_or_else(|| infer_complexity(&task.description));
        let has_tools = !task.tools_needed.is_empty();
        let plan_id = next_plan_id();

        let is_single_step = task.description.len() < SHORT_TASK_CHARS
            && complexity <= SHORT_TASK_MAX_COMPLEXITY
            && task.files.len() <= SHORT_TASK_MAX_FILES;

        let mut steps = Vec::new();
        if is_single_step {
            let backend = task
                .force_backend
                .unwrap_or_else(|| select_backend(StepType::QuickCode, complexity, has_tools));
            steps.push(build_step(&plan_id, 0, StepType::QuickCode, backend, task, complexity, &BTreeSet::new(), true));
        } else {
            let specs = scan_step_types(&task.description, task.files.len());
            let mut leaf_ids = Vec::new();
            let mut code_ids = Vec::new();
            let mut all_ids = Vec::new();
            let mut critical_ids = Vec::new();

            for (idx, spec) in specs.iter().enumerate() {
                let deps: BTreeSet<String> = match spec.step_type {
                    StepType::FileOps | StepType::Research => BTreeSet::new(),
                    StepType::Analysis => all_ids.iter().cloned().collect(),
                    StepType::Testing => {
                        if !code_ids.is_empty() {
                            code_ids.iter().cloned().collect()
                        } else {
                            leaf_ids.iter().cloned().collect()
                        }
                    }
                    _ => leaf_ids.iter().cloned().collect(),
                };

                let backend = task
                    .force_backend
                    .unwrap_or_else(|| select_backend(spec.step_type, complexity, has_tools));
                let step = build_step(&plan_id, idx, spec.step_type, backend, task, complexity, &deps, spec.critical);

                if matches!(spec.step_type, StepType::FileOps | StepType::Research) {
                    leaf_ids.push(step.id.clone());
                }
                if matches!(spec.step_type, StepType::MultiFileCode | StepType::QuickCode) {
                    code_ids.push(step.id.clone());
                }
                if spec.critical {
                    critical_ids.push(step.id.clone());
                }
                all_ids.push(step.id.clone());
                steps.push(step);
            }

            if critical_ids.len() >= 2 {
                let idx = steps.len();
                let backend = select_backend(StepType::Synthesis, complexity, has_tools);
                let deps: BTreeSet<String> = critical_ids.into_iter().collect();
                steps.push(build_step(&plan_id, idx, StepType::Synthesis, backend, task, complexity, &deps, true));
            }
        }

        let breakdown = summarize(&steps);
        let all_subscription = steps.iter().all(|s| s.backend != router_types::BackendId::Api);

        Plan {
            id: plan_id,
            task_description: task.description.clone(),
            steps,
            total_api_cost: breakdown.total_api_cost,
            total_wall_clock_minutes: breakdown.total_wall_clock_minutes,
            needs_approval: breakdown.total_api_cost > APPROVAL_THRESHOLD_USD,
            all_subscription,
            created_at: Utc::now(),
        }
    }

    pub fn estimate_cost(&self, plan: &Plan) -> CostBreakdown {
        summarize(&plan.steps)
    }

    pub fn assess_confidence(&self, task: &Task) -> ConfidenceAssessment {
        assess_confidence(task)
    }

    pub fn format_for_user(&self, plan: &Plan) -> String {
        let mut out = format!(
            "Plan {} — {} step(s), est. ${:.2}, ~{:.0} min{}\n",
            plan.id,
            plan.steps.len(),
            plan.total_api_cost,
            plan.total_wall_clock_minutes,
            if plan.needs_approval { " (needs approval)" } else { "" }
        );
        for step in &plan.steps {
            out.push_str(&format!(
                "  [{}] {:?} via {} — {}\n",
                step.index, step.step_type, step.backend, step.description
            ));
        }
        out
    }
}

#[allow(clippy::too_many_arguments)]
fn build_step(
    plan_id: &str,
    index: usize,
    step_type: StepType,
    backend: router_types::BackendId,
    task: &Task,
    complexity: u8,
    dependencies: &BTreeSet<String>,
    critical: bool,
) -> Step {
    let tokens = estimate_tokens(task.description.len(), task.files.len());
    let cost = estimate_dollar_cost(backend, tokens);
    let minutes = step_minutes(step_type, complexity);

    Step {
        id: format!("{plan_id}-{index}"),
        index,
        description: task.description.clone(),
        backend,
        estimated_tokens: tokens,
        estimated_cost: cost,
        estimated_minutes: minutes,
        dependencies: dependencies.clone(),
        parallelizable: matches!(step_type, StepType::FileOps | StepType::Research | StepType::SimpleTransform | StepType::Documentation),
        critical,
        step_type,
    }
}

fn step_minutes(step_type: StepType, complexity: u8) -> f64 {
    let base = match step_type {
        StepType::FileOps => 2.0,
        StepType::Research => 5.0,
        StepType::Preprocessing => 6.0,
        StepType::MultiFileCode => 10.0,
        StepType::QuickCode => 3.0,
        StepType::Analysis => 8.0,
        StepType::Testing => 4.0,
        StepType::SimpleTransform => 2.0,
        StepType::Documentation => 3.0,
        StepType::Synthesis => 4.0,
    };
    base + complexity as f64 * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_task_is_a_single_free_step() {
        let mut task = Task::new("Write a hello world");
        task.complexity = Some(2);
        let plan = Planner::new().decompose(&task);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.total_api_cost, 0.0);
        assert!(!plan.needs_approval);
        assert!(plan.is_well_formed());
    }

    #[test]
    fn expensive_analysis_needs_approval() {
        let mut task = Task::new(
            "Analyze entire codebase using API for comprehensive security audit of every module, then write a thorough report and organize the output directory structure"
                .repeat(2),
        );
        task.files = (0..20).map(|i| format!("file{i}.rs")).collect();
        task.tools_needed.insert("web".to_string());
        let plan = Planner::new().decompose(&task);
        assert!(plan.steps.iter().any(|s| s.step_type == router_types::StepType::FileOps));
        assert!(plan.needs_approval);
        assert!(plan.total_api_cost > 2.0);
        assert!(plan.is_well_formed());
    }

    #[test]
    fn plan_dependencies_are_always_earlier() {
        let task = Task::new("Refactor the codebase across files, analyze the results, and test everything");
        let plan = Planner::new().decompose(&task);
        assert!(plan.is_well_formed());
    }
}
