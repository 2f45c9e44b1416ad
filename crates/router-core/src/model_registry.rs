use std::collections::BTreeSet;

use router_types::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelTier {
    Budget,
    Fast,
    Standard,
    Premium,
}

#[derive(Debug, Clone, Copy)]
pub struct Provider {
    pub prefix: &'static str,
    pub healthy: bool,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Model {
    pub id: &'static str,
    pub providers: &'static [&'static str],
    pub tier: ModelTier,
    pub cost_per_1k_in: f64,
    pub cost_per_1k_out: f64,
    pub max_context: u32,
    pub strengths: &'static [&'static str],
}

pub const LONG_CONTEXT_MODEL: &str = "long-context-1m";

const MODELS: &[Model] = &[
    Model {
        id: "premium-reasoner",
        providers: &["anthropic", "openai"],
        tier: ModelTier::Premium,
        cost_per_1k_in: 0.015,
        cost_per_1k_out: 0.075,
        max_context: 200_000,
        strengths: &["code", "analysis", "research"],
    },
    Model {
        id: "standard-generalist",
        providers: &["anthropic", "openai", "mistral"],
        tier: ModelTier::Standard,
        cost_per_1k_in: 0.003,
        cost_per_1k_out: 0.015,
        max_context: 128_000,
        strengths: &["code", "writing", "docs", "review", "testing"],
    },
    Model {
        id: "fast-drafter",
        providers: &["openai", "mistral"],
        tier: ModelTier::Fast,
        cost_per_1k_in: 0.0005,
        cost_per_1k_out: 0.0015,
        max_context: 64_000,
        strengths: &["file-ops", "docs", "other", "writing"],
    },
    Model {
        id: "budget-transform",
        providers: &["mistral"],
        tier: ModelTier::Budget,
        cost_per_1k_in: 0.0001,
        cost_per_1k_out: 0.0003,
        max_context: 32_000,
        strengths: &["file-ops", "docs", "other"],
    },
    Model {
        id: LONG_CONTEXT_MODEL,
        providers: &["anthropic"],
        tier: ModelTier::Premium,
        cost_per_1k_in: 0.02,
        cost_per_1k_out: 0.08,
        max_context: 1_000_000,
        strengths: &["code", "analysis", "research", "writing", "docs", "review", "testing", "file-ops", "other"],
    },
];

const PROVIDERS: &[Provider] = &[
    Provider { prefix: "anthropic", healthy: true, priority: 0 },
    Provider { prefix: "openai", healthy: true, priority: 1 },
    Provider { prefix: "mistral", healthy: true, priority: 2 },
];

fn strengths_for(task_type: TaskType) -> &'static str {
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

fn tier_for_complexity(complexity: u8) -> ModelTier {
    if complexity >= 8 {
        ModelTier::Premium
    } else if complexity >= 4 {
        ModelTier::Standard
    } else {
        ModelTier::Fast
    }
}

fn healthy_providers() -> BTreeSet<&'static str> {
    PROVIDERS.iter().filter(|p| p.healthy).map(|p| p.prefix).collect()
}

fn provider_priority(provider: &str) -> u32 {
    PROVIDERS.iter().find(|p| p.prefix == provider).map(|p| p.priority).unwrap_or(u32::MAX)
}

fn estimated_cost(model: &Model, tokens: u64) -> f64 {
    let tokens = tokens as f64;
    0.7 * tokens * model.cost_per_1k_in / 1000.0 + 0.3 * tokens * model.cost_per_1k_out / 1000.0
}

#[derive(Debug, Clone)]
pub struct SelectedModel {
    pub model_id: String,
    pub provider: String,
    pub estimated_cost_per_1k: f64,
}

/// Static-table model selection. `trusted_models` is the set of model ids
/// the shadow-bench has marked "trusted" for this task type with enough
/// samples — computed by the caller so this function stays a pure lookup.
pub fn select_model(
    task_type: TaskType,
    complexity: u8,
    context_size: u64,
    trusted_models: &BTreeSet<String>,
) -> Option<SelectedModel> {
    if context_size > 200_000 {
        let model = MODELS.iter().find(|m| m.id == LONG_CONTEXT_MODEL)?;
        let provider = best_provider_for(model)?;
        return Some(SelectedModel {
            model_id: model.id.to_string(),
            provider: provider.to_string(),
            estimated_cost_per_1k: model.cost_per_1k_in,
        });
    }

    let tier = tier_for_complexity(complexity);
    let strength = strengths_for(task_type);
    let healthy = healthy_providers();

    let mut candidates: Vec<(&Model, &str)> = MODELS
        .iter()
        .filter(|m| m.tier == tier || (tier == ModelTier::Fast && m.tier == ModelTier::Budget))
        .filter(|m| m.strengths.contains(&strength))
        .flat_map(|m| m.providers.iter().filter(|p| healthy.contains(*p)).map(move |p| (m, *p)))
        .collect();

    if candidates.is_empty() {
        return None;
    }

    if !trusted_models.is_empty() {
        let restricted: Vec<_> =
            candidates.iter().filter(|(m, _)| trusted_models.contains(m.id)).cloned().collect();
        if !restricted.is_empty() {
            candidates = restricted;
        }
    }

    candidates.sort_by(|(ma, pa), (mb, pb)| {
        let cost_a = estimated_cost(ma, 1000);
        let cost_b = estimated_cost(mb, 1000);
        cost_a
            .partial_cmp(&cost_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| provider_priority(pa).cmp(&provider_priority(pb)))
    });

    let (model, provider) = candidates.first()?;
    Some(SelectedModel {
        model_id: model.id.to_string(),
        provider: provider.to_string(),
        estimated_cost_per_1k: model.cost_per_1k_in,
    })
}

fn best_provider_for(model: &Model) -> Option<&'static str> {
    let healthy = healthy_providers();
    model
        .providers
        .iter()
        .filter(|p| healthy.contains(*p))
        .min_by_key(|p| provider_priority(p))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_context_forces_long_context_model() {
        let selected = select_model(TaskType::Code, 5, 300_000, &BTreeSet::new()).unwrap();
        assert_eq!(selected.model_id, LONG_CONTEXT_MODEL);
    }

    #[test]
    fn high_complexity_selects_premium_tier() {
        let selected = select_model(TaskType::Analysis, 9, 1000, &BTreeSet::new()).unwrap();
        assert_eq!(selected.model_id, "premium-reasoner");
    }

    #[test]
    fn low_complexity_file_ops_selects_cheapest_candidate() {
        let selected = select_model(TaskType::FileOps, 1, 1000, &BTreeSet::new()).unwrap();
        assert_eq!(selected.model_id, "budget-transform");
    }

    #[test]
    fn trust_restriction_narrows_candidates() {
        let mut trusted = BTreeSet::new();
        trusted.insert("standard-generalist".to_string());
        let selected = select_model(TaskType::Code, 5, 1000, &trusted).unwrap();
        assert_eq!(selected.model_id, "standard-generalist");
    }
}
