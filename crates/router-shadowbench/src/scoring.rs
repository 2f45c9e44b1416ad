//! Pure auto-scoring functions: no I/O, no async, easy to test in
//! isolation from the dispatch/persistence machinery in `manager`/`db`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

const STOP_WORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "will", "your", "their", "there", "which", "about",
    "should", "would", "could", "into", "then", "than", "when", "where", "what", "also", "been",
    "being", "does", "each", "only", "over", "such", "some", "more", "most", "very",
];

fn error_signature() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(traceback|panic(ked)?|unhandled exception|stack trace|syntaxerror|nullpointerexception|segmentation fault)")
            .expect("static error-signature pattern is valid")
    })
}

fn code_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^.*\b(function|class|const|let|import|def|module|export)\b").expect("static keyword pattern is valid")
    })
}

/// Relative length similarity, 1.0 when equal length, decaying toward 0
/// as one output dwarfs the other.
pub fn length_ratio(a_len: usize, b_len: usize) -> f64 {
    let (a, b) = (a_len as f64, b_len as f64);
    if a == 0.0 && b == 0.0 {
        return 1.0;
    }
    a.min(b) / a.max(b)
}

/// How similarly the two outputs use structural formatting: header lines
/// (`#`-prefixed) plus lines carrying a code keyword.
pub fn structure_ratio(a: &str, b: &str) -> f64 {
    let count = |text: &str| -> usize {
        let headers = text.lines().filter(|line| line.trim_start().starts_with('#')).count();
        let keyword_lines = code_keyword_pattern().find_iter(text).count();
        headers + keyword_lines
    };
    let (ca, cb) = (count(a) as f64, count(b) as f64);
    if ca == 0.0 && cb == 0.0 {
        return 1.0;
    }
    ca.min(cb) / ca.max(cb)
}

fn key_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= 4 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity over significant terms (stop words and short
/// tokens filtered out) shared between the two outputs.
pub fn key_term_jaccard(a: &str, b: &str) -> f64 {
    let ta = key_terms(a);
    let tb = key_terms(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 {
        1.0
    } else {
        intersection / union
    }
}

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "js", "jsx", "ts", "tsx", "py", "go", "rb", "java", "c", "cpp", "h", "hpp", "cs", "php",
    "swift", "kt", "scala", "sh",
];

fn is_code_extension(output_path: Option<&str>) -> bool {
    output_path
        .and_then(|path| Path::new(path).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| CODE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// 1 if the primary output path's extension isn't a code extension, else
/// a heuristic syntax check on the shadow output standing in for "parses
/// as JS": every `{`/`}`, `(`/`)`, `[`/`]` balances. No real parser
/// dependency is pulled in for this; it catches truncated or garbled
/// output without claiming to validate a specific language's grammar.
pub fn code_parses(primary_output_path: Option<&str>, text: &str) -> bool {
    if !is_code_extension(primary_output_path) {
        return true;
    }
    let mut stack = Vec::new();
    for ch in text.chars() {
        match ch {
            '{' | '(' | '[' => stack.push(ch),
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Composite auto-score per the weighting: key-term overlap 0.3,
/// structure 0.3, length 0.2, code-parses 0.2 — halved-and-a-bit if the
/// shadow output looks like a bare stack trace or unhandled exception.
pub fn composite_score(
    length_similarity: f64,
    structure_similarity: f64,
    key_term_overlap: f64,
    code_parses: bool,
    shadow_output: &str,
) -> f64 {
    let base = 0.2 * length_similarity
        + 0.3 * structure_similarity
        + 0.3 * key_term_overlap
        + 0.2 * if code_parses { 1.0 } else { 0.0 };

    let penalized = if error_signature().is_match(shadow_output) { base * 0.6 } else { base };

    penalized.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_ratio_is_one_for_equal_lengths() {
        assert_eq!(length_ratio(100, 100), 1.0);
    }

    #[test]
    fn length_ratio_shrinks_for_mismatched_lengths() {
        assert!(length_ratio(50, 200) < 0.3);
    }

    #[test]
    fn structure_ratio_rewards_matching_formatting() {
        let a = "# Heading\n- one\n- two\n```rust\nfn x() {}\n```";
        let b = "# Heading\n- one\n```rust\nfn y() {}\n```";
        assert!(structure_ratio(a, b) > 0.5);
    }

    #[test]
    fn key_term_jaccard_ignores_stop_words() {
        let a = "the refactor touches the authentication module";
        let b = "this change touches authentication module only";
        assert!(key_term_jaccard(a, b) > 0.3);
    }

    #[test]
    fn code_parses_detects_unbalanced_braces() {
        assert!(code_parses(Some("out.rs"), "fn main() { let x = [1, 2, 3]; }"));
        assert!(!code_parses(Some("out.rs"), "fn main() { let x = [1, 2, 3;"));
    }

    #[test]
    fn code_parses_is_always_true_for_non_code_output() {
        assert!(code_parses(Some("report.txt"), "fn main() { let x = [1, 2, 3;"));
        assert!(code_parses(None, "fn main() { let x = [1, 2, 3;"));
    }

    #[test]
    fn composite_score_penalizes_error_signatures() {
        let clean = composite_score(1.0, 1.0, 1.0, true, "the build succeeded");
        let errored = composite_score(1.0, 1.0, 1.0, true, "Traceback (most recent call last): boom");
        assert!(errored < clean);
        assert!((errored - clean * 0.6).abs() < 1e-9);
    }
}
