use std::collections::HashMap;

use router_types::{BackendId, Step};

/// Default paid-API per-token prices, 70/30 input/output split.
pub const DEFAULT_COST_PER_1K_IN: f64 = 3.0 / 1000.0;
pub const DEFAULT_COST_PER_1K_OUT: f64 = 15.0 / 1000.0;

pub fn estimate_tokens(description_len: usize, file_count: usize) -> u64 {
    let base = ((description_len as f64 / 4.0) * 1.3).ceil() as u64 + 2000 * file_count as u64;
    base.max(500)
}

pub fn estimate_dollar_cost(backend: BackendId, tokens: u64) -> f64 {
    if backend.is_subscription() || backend == BackendId::Local {
        return 0.0;
    }
    let tokens = tokens as f64;
    0.7 * tokens * DEFAULT_COST_PER_1K_IN / 1000.0 + 0.3 * tokens * DEFAULT_COST_PER_1K_OUT / 1000.0
}

#[derive(Debug, Clone, Default)]
pub struct CostBreakdown {
    pub total_api_cost: f64,
    pub total_tokens: u64,
    pub total_wall_clock_minutes: f64,
}

/// Critical-path length over the step DAG, memoised longest-path from
/// each step back to its dependency roots.
pub fn critical_path_minutes(steps: &[Step]) -> f64 {
    let mut memo: HashMap<String, f64> = HashMap::new();
    let by_id: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    fn longest(id: &str, by_id: &HashMap<&str, &Step>, memo: &mut HashMap<String, f64>) -> f64 {
        if let Some(v) = memo.get(id) {
            return *v;
        }
        let step = match by_id.get(id) {
            Some(s) => *s,
            None => return 0.0,
        };
        let deps_max = step
            .dependencies
            .iter()
            .map(|d| longest(d, by_id, memo))
            .fold(0.0_f64, f64::max);
        let total = deps_max + step.estimated_minutes;
        memo.insert(id.to_string(), total);
        total
    }

    steps
        .iter()
        .map(|s| longest(&s.id, &by_id, &mut memo))
        .fold(0.0_f64, f64::max)
}

pub fn summarize(steps: &[Step]) -> CostBreakdown {
    CostBreakdown {
        total_api_cost: steps.iter().map(|s| s.estimated_cost).sum(),
        total_tokens: steps.iter().map(|s| s.estimated_tokens).sum(),
        total_wall_clock_minutes: critical_path_minutes(steps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_floor_applies() {
        assert_eq!(estimate_tokens(10, 0), 500);
    }

    #[test]
    fn subscription_and_local_are_free() {
        assert_eq!(estimate_dollar_cost(BackendId::ClaudeCode, 1_000_000), 0.0);
        assert_eq!(estimate_dollar_cost(BackendId::Local, 1_000_000), 0.0);
        assert!(estimate_dollar_cost(BackendId::Api, 1_000_000) > 0.0);
    }
}
