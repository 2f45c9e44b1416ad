use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    FileOps,
    Research,
    Preprocessing,
    MultiFileCode,
    QuickCode,
    Analysis,
    Testing,
    SimpleTransform,
    Documentation,
    Synthesis,
}

/// A single unit of dispatch inside a `Plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub index: usize,
    pub description: String,
    pub backend: BackendId,
    pub estimated_tokens: u64,
    pub estimated_cost: f64,
    pub estimated_minutes: f64,
    pub dependencies: BTreeSet<String>,
    pub parallelizable: bool,
    pub critical: bool,
    #[serde(rename = "type")]
    pub step_type: StepType,
}

/// An ordered, dependency-ordered decomposition of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub task_description: String,
    pub steps: Vec<Step>,
    pub total_api_cost: f64,
    pub total_wall_clock_minutes: f64,
    pub needs_approval: bool,
    pub all_subscription: bool,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Every dependency of every step refers to an earlier step in the
    /// sequence, and the final step is marked `synthesis` whenever the
    /// plan has two or more critical steps.
    pub fn is_well_formed(&self) -> bool {
        for (idx, step) in self.steps.iter().enumerate() {
            for dep in &step.dependencies {
                let dep_idx = self.steps.iter().position(|s| &s.id == dep);
                match dep_idx {
                    Some(dep_idx) if dep_idx < idx => {}
                    _ => return false,
                }
            }
        }
        let critical_count = self.steps.iter().filter(|s| s.critical).count();
        if critical_count >= 2 {
            match self.steps.last() {
                Some(last) if last.step_type == StepType::Synthesis => {}
                _ => return false,
            }
        }
        true
    }
}
