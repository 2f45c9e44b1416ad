use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::backend::BackendId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Code,
    Review,
    Analysis,
    Research,
    Writing,
    FileOps,
    Docs,
    Testing,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Urgent,
    Normal,
    Background,
}

impl Urgency {
    /// Scheduler priority weight: urgent=100, normal=50, background=10.
    pub fn priority(self) -> u32 {
        match self {
            Urgency::Urgent => 100,
            Urgency::Normal => 50,
            Urgency::Background => 10,
        }
    }
}

impl Default for Urgency {
    fn default() -> Self {
        Urgency::Normal
    }
}

fn default_user_id() -> String {
    "meir".to_string()
}

/// A caller-submitted unit of work. Read-only once accepted by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub urgency: Urgency,
    /// 1-10; inferred by the planner if absent.
    pub complexity: Option<u8>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub tools_needed: BTreeSet<String>,
    pub output_path: Option<String>,
    pub force_backend: Option<BackendId>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            task_type: None,
            urgency: Urgency::Normal,
            complexity: None,
            files: Vec::new(),
            tools_needed: BTreeSet::new(),
            output_path: None,
            force_backend: None,
            user_id: default_user_id(),
            metadata: BTreeMap::new(),
        }
    }
}
