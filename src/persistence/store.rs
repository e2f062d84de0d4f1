//! SQLite-based job state store

use crate::core::condition::StopSignal;
use crate::core::state::{PipelineJob, ResultBundle, StepExecution, StepStatus};
use crate::persistence::JobStateStore;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        job_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        stage TEXT NOT NULL,
        progress_percent INTEGER NOT NULL DEFAULT 0,
        current_step TEXT,
        detected_document_class TEXT,
        target_language TEXT,
        result_json TEXT,
        halt_json TEXT,
        error TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    r#"
    CREATE TABLE IF NOT EXISTS step_executions (
        job_id TEXT NOT NULL,
        step_id TEXT NOT NULL,
        step_name TEXT NOT NULL,
        step_order INTEGER NOT NULL,
        status TEXT NOT NULL,
        input_text TEXT,
        output_text TEXT,
        confidence REAL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        metadata_json TEXT,
        started_at TEXT,
        completed_at TEXT,
        duration_ms INTEGER,
        PRIMARY KEY (job_id, step_id)
    )
    "#,
];

/// SQLite job store
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if needed) a database file; `:memory:` opens a private in-memory database
    pub async fn new(db_path: &str) -> Result<Self> {
        let (options, max_connections) = if db_path == ":memory:" {
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            (
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .create_if_missing(true),
                4,
            )
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("medpipe");
        std::fs::create_dir_all(&db_dir)?;
        Self::open(&db_dir.join("jobs.db")).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let path = path
            .to_str()
            .with_context(|| format!("Database path is not valid UTF-8: {}", path.display()))?;
        Self::new(path).await
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialize schema")?;
        }
        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn job_from_row(row: &SqliteRow) -> Result<PipelineJob> {
        let result: Option<String> = row.get("result_json");
        let halt: Option<String> = row.get("halt_json");

        Ok(PipelineJob {
            job_id: Uuid::parse_str(&row.get::<String, _>("job_id"))?,
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(anyhow::Error::msg)?,
            stage: row
                .get::<String, _>("stage")
                .parse()
                .map_err(anyhow::Error::msg)?,
            progress_percent: row.get::<i64, _>("progress_percent").clamp(0, 100) as u8,
            current_step: row.get("current_step"),
            detected_document_class: row.get("detected_document_class"),
            target_language: row.get("target_language"),
            result: result
                .map(|json| serde_json::from_str::<ResultBundle>(&json))
                .transpose()
                .context("Corrupt result bundle")?,
            halt: halt
                .map(|json| serde_json::from_str::<StopSignal>(&json))
                .transpose()
                .context("Corrupt halt signal")?,
            error: row.get("error"),
            created_at: Self::from_naive(row.get("created_at")),
            started_at: row
                .get::<Option<NaiveDateTime>, _>("started_at")
                .map(Self::from_naive),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
        })
    }

    fn execution_from_row(row: &SqliteRow) -> Result<StepExecution> {
        let metadata: Option<String> = row.get("metadata_json");
        Ok(StepExecution {
            job_id: Uuid::parse_str(&row.get::<String, _>("job_id"))?,
            step_id: row.get("step_id"),
            step_name: row.get("step_name"),
            order: row.get::<i64, _>("step_order") as i32,
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(anyhow::Error::msg)?,
            input_text: row.get("input_text"),
            output_text: row.get("output_text"),
            confidence: row.get("confidence"),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            error: row.get("error"),
            metadata: match metadata {
                Some(json) => serde_json::from_str(&json).context("Corrupt step metadata")?,
                None => serde_json::Value::Null,
            },
            started_at: row
                .get::<Option<NaiveDateTime>, _>("started_at")
                .map(Self::from_naive),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|d| d as u64),
        })
    }
}

#[async_trait::async_trait]
impl JobStateStore for SqliteJobStore {
    async fn save_job(&self, job: &PipelineJob) -> Result<()> {
        let result = job.result.as_ref().map(serde_json::to_string).transpose()?;
        let halt = job.halt.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO jobs
            (job_id, status, stage, progress_percent, current_step, detected_document_class,
             target_language, result_json, halt_json, error, created_at, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(job.job_id.to_string())
        .bind(job.status.as_str())
        .bind(job.stage.as_str())
        .bind(job.progress_percent as i64)
        .bind(&job.current_step)
        .bind(&job.detected_document_class)
        .bind(&job.target_language)
        .bind(result)
        .bind(halt)
        .bind(&job.error)
        .bind(Self::to_naive(job.created_at))
        .bind(job.started_at.map(Self::to_naive))
        .bind(job.completed_at.map(Self::to_naive))
        .execute(&self.pool)
        .await
        .context("Failed to save job")?;

        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<PipelineJob>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load job")?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<PipelineJob>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list jobs")?;

        rows.iter().map(Self::job_from_row).collect()
    }

    async fn save_step_execution(&self, execution: &StepExecution) -> Result<()> {
        let metadata = if execution.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&execution.metadata)?)
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO step_executions
            (job_id, step_id, step_name, step_order, status, input_text, output_text, confidence,
             retry_count, error, metadata_json, started_at, completed_at, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(execution.job_id.to_string())
        .bind(&execution.step_id)
        .bind(&execution.step_name)
        .bind(execution.order as i64)
        .bind(execution.status.as_str())
        .bind(&execution.input_text)
        .bind(&execution.output_text)
        .bind(execution.confidence)
        .bind(execution.retry_count as i64)
        .bind(&execution.error)
        .bind(metadata)
        .bind(execution.started_at.map(Self::to_naive))
        .bind(execution.completed_at.map(Self::to_naive))
        .bind(execution.duration_ms.map(|d| d as i64))
        .execute(&self.pool)
        .await
        .context("Failed to save step execution")?;

        Ok(())
    }

    async fn list_step_executions(&self, job_id: Uuid) -> Result<Vec<StepExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE job_id = ?1 ORDER BY step_order ASC, step_id ASC",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list step executions")?;

        rows.iter().map(Self::execution_from_row).collect()
    }

    async fn purge_content(&self, job_id: Uuid) -> Result<bool> {
        let updated = sqlx::query("UPDATE jobs SET result_json = NULL WHERE job_id = ?1")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to purge job content")?
            .rows_affected();

        sqlx::query(
            "UPDATE step_executions SET input_text = NULL, output_text = NULL WHERE job_id = ?1",
        )
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to purge step content")?;

        Ok(updated > 0)
    }

    async fn abandon_running_steps(&self, job_id: Uuid, reason: &str) -> Result<usize> {
        let updated = sqlx::query(
            r#"
            UPDATE step_executions
            SET status = ?1, error = ?2, completed_at = ?3
            WHERE job_id = ?4 AND status IN (?5, ?6)
            "#,
        )
        .bind(StepStatus::Failed.as_str())
        .bind(reason)
        .bind(Self::to_naive(Utc::now()))
        .bind(job_id.to_string())
        .bind(StepStatus::Pending.as_str())
        .bind(StepStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to abandon running steps")?
        .rows_affected();

        Ok(updated as usize)
    }
}
