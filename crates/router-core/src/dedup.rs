use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use router_types::{DedupEntry, DedupOutcome, DedupRecommendation, DedupStatus, ScopeMarker};
use serde::{Deserialize, Serialize};

use crate::storage::JsonDocument;

const WINDOW_MINUTES: i64 = 30;
const SKIP_OVERLAP: f64 = 0.70;
const WARN_OVERLAP: f64 = 0.50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupStore {
    pub entries: Vec<DedupEntry>,
}

pub struct Dedup {
    doc: JsonDocument<DedupStore>,
}

impl Dedup {
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let doc = JsonDocument::open(path).await?;
        Ok(Self { doc })
    }

    /// Read-only: does not register anything. The router calls this
    /// before deciding whether to proceed, then calls `register` itself
    /// once it commits to running the task.
    pub async fn check(&self, description: &str) -> DedupOutcome {
        self.evict_expired().await;
        let normalized = normalize(description);
        let scopes = extract_scopes(description);
        let fingerprint_tokens = tokenize(&normalized);

        let store = self.doc.get().await;
        let cutoff = Utc::now() - Duration::minutes(WINDOW_MINUTES);

        let mut best: Option<(f64, &DedupEntry)> = None;
        for entry in store.entries.iter().filter(|e| e.started_at >= cutoff) {
            let entry_tokens = tokenize(&entry.normalized_description);
            let overlap = jaccard(&fingerprint_tokens, &entry_tokens);
            if best.map(|(o, _)| overlap > o).unwrap_or(true) {
                best = Some((overlap, entry));
            }
        }

        let Some((overlap, entry)) = best else {
            return DedupOutcome { recommendation: DedupRecommendation::Proceed, existing_task_id: None, overlap: 0.0 };
        };

        if overlap > SKIP_OVERLAP {
            let scopes_match = scopes_compatible(&scopes, &entry.scopes);
            let active = matches!(entry.status, DedupStatus::Queued | DedupStatus::Running);
            if active && scopes_match {
                return DedupOutcome {
                    recommendation: DedupRecommendation::Skip,
                    existing_task_id: Some(entry.task_id.clone()),
                    overlap,
                };
            }
            return DedupOutcome {
                recommendation: DedupRecommendation::Warn,
                existing_task_id: Some(entry.task_id.clone()),
                overlap,
            };
        }

        if overlap >= WARN_OVERLAP {
            return DedupOutcome {
                recommendation: DedupRecommendation::Warn,
                existing_task_id: Some(entry.task_id.clone()),
                overlap,
            };
        }

        DedupOutcome { recommendation: DedupRecommendation::Proceed, existing_task_id: None, overlap }
    }

    pub async fn register(&self, task_id: &str, description: &str) -> anyhow::Result<()> {
        let normalized = normalize(description);
        let fingerprint = fingerprint_of(&normalized);
        let scopes = extract_scopes(description);
        self.doc
            .mutate(|store| {
                store.entries.push(DedupEntry {
                    task_id: task_id.to_string(),
                    normalized_description: normalized,
                    fingerprint,
                    started_at: Utc::now(),
                    status: DedupStatus::Queued,
                    scopes,
                });
            })
            .await?;
        Ok(())
    }

    pub async fn mark_status(&self, task_id: &str, status: DedupStatus) -> anyhow::Result<()> {
        self.doc
            .mutate(|store| {
                if let Some(entry) = store.entries.iter_mut().find(|e| e.task_id == task_id) {
                    entry.status = status;
                }
            })
            .await?;
        Ok(())
    }

    async fn evict_expired(&self) {
        let cutoff = Utc::now() - Duration::minutes(WINDOW_MINUTES);
        let _ = self
            .doc
            .mutate(|store| {
                store.entries.retain(|e| e.started_at >= cutoff);
            })
            .await;
    }
}

fn normalize(description: &str) -> String {
    let lower = description.to_lowercase();
    let stripped: String = lower.chars().map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' }).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokenize(normalized: &str) -> BTreeSet<&str> {
    normalized.split_whitespace().collect()
}

fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn fingerprint_of(normalized: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Extracts numeric ranges like "1-10" or "pages 11-20" into scope tuples.
fn extract_scopes(description: &str) -> Vec<ScopeMarker> {
    let bytes = description.as_bytes();
    let mut scopes = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let first_num: i64 = description[start..i].parse().unwrap_or(0);
            if i < bytes.len() && bytes[i] == b'-' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
                let dash = i;
                i += 1;
                let second_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let second_num: i64 = description[second_start..i].parse().unwrap_or(0);
                scopes.push((first_num, second_num));
                let _ = dash;
            }
        } else {
            i += 1;
        }
    }
    scopes
}

fn scopes_compatible(a: &[ScopeMarker], b: &[ScopeMarker]) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.iter().any(|sa| b.iter().any(|sb| sa == sb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_identical_task_is_skipped_while_first_runs() {
        let dir = tempfile::tempdir().unwrap();
        let dedup = Dedup::open(dir.path().join("dedup.json")).await.unwrap();
        dedup.register("task-1", "Summarize the quarterly report").await.unwrap();
        let outcome = dedup.check("Summarize the quarterly report").await;
        assert_eq!(outcome.recommendation, DedupRecommendation::Skip);
        assert_eq!(outcome.existing_task_id.as_deref(), Some("task-1"));
    }

    #[tokio::test]
    async fn differing_numeric_scopes_are_not_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let dedup = Dedup::open(dir.path().join("dedup.json")).await.unwrap();
        dedup.register("task-1", "Process pages 1-10").await.unwrap();
        let outcome = dedup.check("Process pages 11-20").await;
        assert_ne!(outcome.recommendation, DedupRecommendation::Skip);
    }

    #[tokio::test]
    async fn unrelated_tasks_proceed() {
        let dir = tempfile::tempdir().unwrap();
        let dedup = Dedup::open(dir.path().join("dedup.json")).await.unwrap();
        dedup.register("task-1", "Summarize the quarterly report").await.unwrap();
        let outcome = dedup.check("Write a poem about the ocean").await;
        assert_eq!(outcome.recommendation, DedupRecommendation::Proceed);
    }

    #[tokio::test]
    async fn done_entries_no_longer_trigger_skip() {
        let dir = tempfile::tempdir().unwrap();
        let dedup = Dedup::open(dir.path().join("dedup.json")).await.unwrap();
        dedup.register("task-1", "Summarize the quarterly report").await.unwrap();
        dedup.mark_status("task-1", DedupStatus::Done).await.unwrap();
        let outcome = dedup.check("Summarize the quarterly report").await;
        assert_eq!(outcome.recommendation, DedupRecommendation::Warn);
    }
}
