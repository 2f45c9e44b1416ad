use router_types::{BackendId, StepType, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    pub step_type: StepType,
    pub parallelizable: bool,
    pub critical: bool,
}

const FILE_OPS_KEYWORDS: &[&str] = &["move file", "rename file", "organize", "directory", "folder structure"];
const RESEARCH_KEYWORDS: &[&str] = &["research", "investigate", "look up", "find out", "survey"];
const PREPROCESSING_KEYWORDS: &[&str] = &["entire codebase", "large context", "whole repository", "full history"];
const MULTI_FILE_KEYWORDS: &[&str] = &["across files", "multiple files", "codebase", "refactor"];
const QUICK_CODE_KEYWORDS: &[&str] = &["quick fix", "small change", "typo", "one-line"];
const ANALYSIS_KEYWORDS: &[&str] = &["analyze", "analyse", "audit", "review", "assess", "security audit"];
const TESTING_KEYWORDS: &[&str] = &["test", "qa", "verify behaviour", "verify behavior", "regression"];
const SIMPLE_TRANSFORM_KEYWORDS: &[&str] = &["format", "convert", "translate", "rename variable"];
const DOCUMENTATION_KEYWORDS: &[&str] = &["document", "docs", "readme", "comment the"];

/// Scans the description against a fixed keyword set, in the canonical
/// dispatch order: file-ops, research, preprocessing, multi-file code,
/// quick code, analysis, testing, simple transforms, documentation.
/// Synthesis is appended by the caller, never detected here.
pub fn scan_step_types(description: &str, file_count: usize) -> Vec<StepSpec> {
    let lower = description.to_lowercase();
    let mut specs = Vec::new();

    let mut push = |step_type: StepType, parallelizable: bool, critical: bool| {
        specs.push(StepSpec { step_type, parallelizable, critical });
    };

    if FILE_OPS_KEYWORDS.iter().any(|k| lower.contains(k)) || file_count > 5 {
        push(StepType::FileOps, true, true);
    }
    if RESEARCH_KEYWORDS.iter().any(|k| lower.contains(k)) {
        push(StepType::Research, true, true);
    }
    if PREPROCESSING_KEYWORDS.iter().any(|k| lower.contains(k)) {
        push(StepType::Preprocessing, false, true);
    }
    if MULTI_FILE_KEYWORDS.iter().any(|k| lower.contains(k)) || file_count > 2 {
        push(StepType::MultiFileCode, false, true);
    }
    if QUICK_CODE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        push(StepType::QuickCode, false, true);
    }
    if ANALYSIS_KEYWORDS.iter().any(|k| lower.contains(k)) {
        push(StepType::Analysis, false, true);
    }
    if TESTING_KEYWORDS.iter().any(|k| lower.contains(k)) {
        push(StepType::Testing, false, false);
    }
    if SIMPLE_TRANSFORM_KEYWORDS.iter().any(|k| lower.contains(k)) {
        push(StepType::SimpleTransform, true, false);
    }
    if DOCUMENTATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        push(StepType::Documentation, true, false);
    }

    if specs.is_empty() {
        push(StepType::QuickCode, false, true);
    }

    specs
}

/// Fixed priority ladder mapping a step's declared type and the task's
/// complexity/tool needs onto a backend.
pub fn select_backend(step_type: StepType, complexity: u8, has_external_tools: bool) -> BackendId {
    if has_external_tools {
        return BackendId::Api;
    }
    match step_type {
        StepType::MultiFileCode => BackendId::ClaudeCode,
        StepType::QuickCode | StepType::FileOps => BackendId::Codex,
        StepType::Analysis | StepType::Testing => {
            if complexity >= 7 {
                BackendId::Api
            } else {
                BackendId::ClaudeCode
            }
        }
        StepType::SimpleTransform | StepType::Documentation => BackendId::Local,
        StepType::Research | StepType::Preprocessing | StepType::Synthesis => {
            if complexity >= 7 {
                BackendId::ClaudeCode
            } else if complexity >= 4 {
                BackendId::Codex
            } else {
                BackendId::Local
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scan_falls_back_to_quick_code() {
        let specs = scan_step_types("do the thing", 0);
        assert_eq!(specs[0].step_type, StepType::QuickCode);
    }

    #[test]
    fn file_heavy_description_gets_file_ops() {
        let specs = scan_step_types("organize this directory", 1);
        assert!(specs.iter().any(|s| s.step_type == StepType::FileOps));
    }

    #[test]
    fn external_tools_force_api() {
        assert_eq!(select_backend(StepType::QuickCode, 2, true), BackendId::Api);
    }

    #[test]
    fn high_complexity_analysis_routes_to_api() {
        assert_eq!(select_backend(StepType::Analysis, 8, false), BackendId::Api);
        assert_eq!(select_backend(StepType::Analysis, 5, false), BackendId::ClaudeCode);
    }
}
