//! The shadow-bench relational store: one SQLite database per process,
//! WAL-mode, single writer. Mirrors the layout in the persisted-state
//! section of the external interface: shadow_results, trust_scores,
//! user_feedback, scorer_calibration, promotions.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use router_types::{DifficultyBand, ShadowResult, TrustScore, TrustTrend};
use tokio::sync::Mutex;

use crate::types::ShadowBenchResult;

pub struct ShadowDb {
    conn: Arc<Mutex<Connection>>,
}

impl ShadowDb {
    pub async fn open(db_path: &Path) -> ShadowBenchResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> ShadowBenchResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS shadow_results (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                description TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                primary_backend TEXT NOT NULL,
                primary_model TEXT NOT NULL,
                primary_duration_ms INTEGER NOT NULL,
                primary_tokens INTEGER NOT NULL,
                primary_cost_usd REAL NOT NULL,
                primary_output_length INTEGER NOT NULL,
                primary_output_hash TEXT NOT NULL,
                primary_success INTEGER NOT NULL,
                shadow_backend TEXT NOT NULL,
                shadow_model TEXT NOT NULL,
                shadow_duration_ms INTEGER NOT NULL,
                shadow_tokens INTEGER NOT NULL,
                shadow_cost_usd REAL NOT NULL,
                shadow_output_length INTEGER NOT NULL,
                shadow_output_hash TEXT NOT NULL,
                shadow_success INTEGER NOT NULL,
                auto_score REAL NOT NULL,
                user_score REAL,
                length_similarity REAL NOT NULL,
                structure_similarity REAL NOT NULL,
                key_term_overlap REAL NOT NULL,
                code_parses INTEGER NOT NULL,
                difficulty_band TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_shadow_results_task_type ON shadow_results(task_type)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_shadow_results_shadow_model ON shadow_results(shadow_model)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_shadow_results_timestamp ON shadow_results(timestamp)", [])?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trust_scores (
                model TEXT NOT NULL,
                task_type TEXT NOT NULL,
                difficulty_band TEXT NOT NULL,
                score REAL NOT NULL,
                samples INTEGER NOT NULL,
                total_weight REAL NOT NULL,
                trend TEXT NOT NULL,
                backends TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (model, task_type, difficulty_band)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_feedback (
                shadow_id TEXT PRIMARY KEY,
                score REAL NOT NULL,
                comment TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS scorer_calibration (
                model TEXT PRIMARY KEY,
                factor REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                last_calibrated TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS promotions (
                id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                task_type TEXT NOT NULL,
                difficulty_band TEXT NOT NULL,
                trust_score REAL NOT NULL,
                projected_monthly_savings REAL NOT NULL,
                status TEXT NOT NULL,
                promoted_at TEXT NOT NULL,
                reverted_at TEXT
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn insert_result(&self, result: &ShadowResult) -> ShadowBenchResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO shadow_results (
                id, task_id, task_type, description, timestamp,
                primary_backend, primary_model, primary_duration_ms, primary_tokens, primary_cost_usd,
                primary_output_length, primary_output_hash, primary_success,
                shadow_backend, shadow_model, shadow_duration_ms, shadow_tokens, shadow_cost_usd,
                shadow_output_length, shadow_output_hash, shadow_success,
                auto_score, user_score, length_similarity, structure_similarity, key_term_overlap,
                code_parses, difficulty_band, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
            params![
                result.id,
                result.primary_task_id,
                result.task_type,
                result.description,
                result.created_at.to_rfc3339(),
                result.primary.backend.as_str(),
                result.primary.model,
                result.primary.duration_ms as i64,
                result.primary.tokens as i64,
                result.primary.cost_usd,
                result.primary.output_length as i64,
                result.primary.output_hash,
                result.primary.success as i64,
                result.shadow.backend.as_str(),
                result.shadow.model,
                result.shadow.duration_ms as i64,
                result.shadow.tokens as i64,
                result.shadow.cost_usd,
                result.shadow.output_length as i64,
                result.shadow.output_hash,
                result.shadow.success as i64,
                result.auto_score,
                result.user_score,
                result.length_similarity,
                result.structure_similarity,
                result.key_term_overlap,
                result.code_parses as i64,
                result.difficulty_band.as_str(),
                result.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn record_feedback(&self, shadow_id: &str, score: f64, comment: Option<&str>) -> ShadowBenchResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO user_feedback (shadow_id, score, comment, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(shadow_id) DO UPDATE SET score = excluded.score, comment = excluded.comment",
            params![shadow_id, score, comment, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn get_trust_score(
        &self,
        model: &str,
        task_type: &str,
        band: &str,
    ) -> ShadowBenchResult<Option<TrustScore>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT model, task_type, difficulty_band, score, samples, total_weight, trend, backends, last_updated
                 FROM trust_scores WHERE model = ?1 AND task_type = ?2 AND difficulty_band = ?3",
                params![model, task_type, band],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(model, task_type, band, score, samples, total_weight, trend, backends, last_updated)| TrustScore {
            model,
            task_type,
            band,
            score,
            samples: samples as u64,
            total_weight,
            trend: parse_trend(&trend),
            backends: serde_json::from_str(&backends).unwrap_or_default(),
            last_updated: last_updated.parse().unwrap_or_else(|_| Utc::now()),
        }))
    }

    pub async fn upsert_trust_score(&self, score: &TrustScore) -> ShadowBenchResult<()> {
        let conn = self.conn.lock().await;
        let backends = serde_json::to_string(&score.backends)?;
        conn.execute(
            "INSERT INTO trust_scores (model, task_type, difficulty_band, score, samples, total_weight, trend, backends, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(model, task_type, difficulty_band) DO UPDATE SET
                score = excluded.score,
                samples = excluded.samples,
                total_weight = excluded.total_weight,
                trend = excluded.trend,
                backends = excluded.backends,
                last_updated = excluded.last_updated",
            params![
                score.model,
                score.task_type,
                score.band,
                score.score,
                score.samples as i64,
                score.total_weight,
                trend_str(score.trend),
                backends,
                score.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn insert_promotion(
        &self,
        id: &str,
        model: &str,
        task_type: &str,
        band: DifficultyBand,
        trust_score: f64,
        projected_monthly_savings: f64,
        status: &str,
    ) -> ShadowBenchResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO promotions (id, model, task_type, difficulty_band, trust_score, projected_monthly_savings, status, promoted_at, reverted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
            params![id, model, task_type, band.as_str(), trust_score, projected_monthly_savings, status, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn scorer_factor(&self, model: &str) -> ShadowBenchResult<f64> {
        let conn = self.conn.lock().await;
        let factor = conn
            .query_row("SELECT factor FROM scorer_calibration WHERE model = ?1", params![model], |row| {
                row.get::<_, f64>(0)
            })
            .optional()?;
        Ok(factor.unwrap_or(1.0))
    }

    /// Models scored above `threshold` with at least `min_samples` samples
    /// for this task type, matching either the specific difficulty band or
    /// the aggregate `"all"` band.
    pub async fn trusted_models(
        &self,
        task_type: &str,
        band: &str,
        threshold: f64,
        min_samples: u64,
    ) -> ShadowBenchResult<BTreeSet<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT model FROM trust_scores
             WHERE task_type = ?1 AND (difficulty_band = ?2 OR difficulty_band = 'all')
               AND score >= ?3 AND samples >= ?4",
        )?;
        let rows =
            stmt.query_map(params![task_type, band, threshold, min_samples as i64], |row| row.get::<_, String>(0))?;
        let mut set = BTreeSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }
}

fn trend_str(trend: TrustTrend) -> &'static str {
    match trend {
        TrustTrend::Rising => "rising",
        TrustTrend::Stable => "stable",
        TrustTrend::Falling => "falling",
    }
}

fn parse_trend(raw: &str) -> TrustTrend {
    match raw {
        "rising" => TrustTrend::Rising,
        "falling" => TrustTrend::Falling,
        _ => TrustTrend::Stable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_types::{BackendId, ExecutionRecord};

    fn sample_result() -> ShadowResult {
        ShadowResult {
            id: "r1".to_string(),
            primary_task_id: "t1".to_string(),
            task_type: "code".to_string(),
            description: "refactor module".to_string(),
            primary: ExecutionRecord {
                backend: BackendId::ClaudeCode,
                model: "claude".to_string(),
                duration_ms: 1200,
                tokens: 500,
                cost_usd: 0.0,
                output_length: 400,
                output_hash: "abc".to_string(),
                success: true,
            },
            shadow: ExecutionRecord {
                backend: BackendId::Local,
                model: "local-1".to_string(),
                duration_ms: 900,
                tokens: 450,
                cost_usd: 0.0,
                output_length: 380,
                output_hash: "def".to_string(),
                success: true,
            },
            auto_score: 0.82,
            user_score: None,
            length_similarity: 0.95,
            structure_similarity: 0.9,
            key_term_overlap: 0.7,
            code_parses: true,
            difficulty_band: DifficultyBand::Medium,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_query_trusted_models() {
        let dir = tempfile::tempdir().unwrap();
        let db = ShadowDb::open(&dir.path().join("bench.db")).await.unwrap();
        db.insert_result(&sample_result()).await.unwrap();

        let score = TrustScore {
            model: "local-1".to_string(),
            task_type: "code".to_string(),
            band: "medium".to_string(),
            score: 0.85,
            samples: 20,
            total_weight: 20.0,
            trend: TrustTrend::Rising,
            backends: vec![BackendId::Local],
            last_updated: Utc::now(),
        };
        db.upsert_trust_score(&score).await.unwrap();

        let trusted = db.trusted_models("code", "medium", 0.8, 15).await.unwrap();
        assert!(trusted.contains("local-1"));

        let wrong_band = db.trusted_models("code", "hard", 0.8, 15).await.unwrap();
        assert!(wrong_band.is_empty());

        let none_trusted = db.trusted_models("code", "medium", 0.8, 25).await.unwrap();
        assert!(none_trusted.is_empty());
    }

    #[tokio::test]
    async fn feedback_upsert_overwrites_previous_score() {
        let dir = tempfile::tempdir().unwrap();
        let db = ShadowDb::open(&dir.path().join("bench.db")).await.unwrap();
        db.insert_result(&sample_result()).await.unwrap();
        db.record_feedback("r1", 0.5, Some("looked fine")).await.unwrap();
        db.record_feedback("r1", 0.9, None).await.unwrap();
    }
}
