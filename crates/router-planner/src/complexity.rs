use router_types::Task;

const TRIVIAL_MARKERS: &[&str] = &["hello world", "typo", "rename", "bump version", "quick fix"];
const TECHNICAL_TERMS: &[&str] = &[
    "api", "database", "auth", "security", "architecture", "migrate", "refactor", "concurrent",
    "distributed", "algorithm", "protocol", "schema", "encryption", "async",
];
const CONJUNCTIONS: &[&str] = &["and", "then", "also", "additionally", "afterwards"];
const COMPLEX_MARKERS: &[&str] = &["complex", "comprehensive", "entire codebase", "audit", "thorough"];

/// Additive heuristic on the description. Clamped to 1-10.
pub fn infer_complexity(description: &str) -> u8 {
    let lower = description.to_lowercase();
    let mut score: i32 = 5;

    if TRIVIAL_MARKERS.iter().any(|m| lower.contains(m)) {
        score -= 2;
    }
    if description.len() > 400 {
        score += 3;
    } else if description.len() > 200 {
        score += 2;
    }

    let technical_hits = TECHNICAL_TERMS.iter().filter(|t| lower.contains(*t)).count();
    score += technical_hits.min(4) as i32;

    let conjunction_hits = CONJUNCTIONS.iter().filter(|c| word_present(&lower, c)).count();
    score += conjunction_hits.min(3) as i32;

    if COMPLEX_MARKERS.iter().any(|m| lower.contains(m)) {
        score += 3;
    }

    score.clamp(1, 10) as u8
}

fn word_present(haystack: &str, word: &str) -> bool {
    haystack.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *word)
}

const LOW_KEYWORDS: &[&str] = &["what is", "define", "explain briefly", "how do i"];
const CALENDAR_MEMORY_MATH: &[&str] = &["what time", "remind me", "calculate", "what's today"];

/// Confidence band returned to the router's self-handle gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceRecommendation {
    SelfHandle,
    Offer,
    Route,
}

#[derive(Debug, Clone)]
pub struct ConfidenceAssessment {
    pub score: i32,
    pub recommendation: ConfidenceRecommendation,
    pub reason: String,
}

/// Additive scoring: high score means the router should keep the task
/// for itself (no backend dispatch needed at all).
pub fn assess_confidence(task: &Task) -> ConfidenceAssessment {
    let lower = task.description.to_lowercase();
    let mut score: i32 = 40;
    let mut reasons = Vec::new();

    if LOW_KEYWORDS.iter().any(|k| lower.contains(k)) {
        score += 20;
        reasons.push("low-complexity question form");
    }
    if CALENDAR_MEMORY_MATH.iter().any(|k| lower.contains(k)) {
        score += 40;
        reasons.push("calendar/memory/math lexeme");
    }
    if task.description.trim_end().ends_with('?') && task.description.len() < 80 {
        score += 15;
        reasons.push("short question form");
    }

    if !task.tools_needed.is_empty() {
        score -= 30;
        reasons.push("requires external tools");
    }
    if task.files.len() > 2 {
        score -= 20;
        reasons.push("touches multiple files");
    }
    if task.description.len() > 300 {
        score -= 20;
        reasons.push("long output expected");
    }
    if COMPLEX_MARKERS.iter().any(|m| lower.contains(m)) {
        score -= 25;
        reasons.push("complex-task pattern");
    }

    let score = score.clamp(0, 100);
    let recommendation = if score > 95 {
        ConfidenceRecommendation::SelfHandle
    } else if score >= 50 {
        ConfidenceRecommendation::Offer
    } else {
        ConfidenceRecommendation::Route
    };

    ConfidenceAssessment {
        score,
        recommendation,
        reason: if reasons.is_empty() {
            "default routing".to_string()
        } else {
            reasons.join("; ")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_world_is_low_complexity() {
        assert!(infer_complexity("Write a hello world program") <= 4);
    }

    #[test]
    fn long_technical_description_is_high_complexity() {
        let desc = "Analyze entire codebase using API for comprehensive security audit of the authentication and encryption modules, then refactor the distributed algorithm".repeat(2);
        assert!(infer_complexity(&desc) >= 7);
    }

    #[test]
    fn complexity_stays_in_bounds() {
        assert!((1..=10).contains(&infer_complexity("")));
        assert!((1..=10).contains(&infer_complexity(&"complex ".repeat(200))));
    }

    #[test]
    fn tool_needs_push_toward_route() {
        let mut task = Task::new("Summarize this");
        task.tools_needed.insert("web".to_string());
        let assessment = assess_confidence(&task);
        assert_ne!(assessment.recommendation, ConfidenceRecommendation::SelfHandle);
    }
}
