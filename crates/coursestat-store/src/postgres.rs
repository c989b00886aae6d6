//! Postgres job store.
//!
//! Every mutating operation runs inside one transaction and rolls back on
//! any error, keeping the persisted status and the provider's in-memory
//! watchdog state from diverging: the caller only clears its local state
//! after the commit succeeded.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use coursestat_types::{JobRow, JobState};

use crate::{JobStore, StoreError};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS coursestat_jobs (
    job_id          TEXT PRIMARY KEY,
    job_type        TEXT NOT NULL,
    name            TEXT NOT NULL,
    started_at      TIMESTAMPTZ,
    finished_at     TIMESTAMPTZ,
    state           TEXT NOT NULL,
    status_message  TEXT,
    descriptor      JSONB NOT NULL,
    periodical      BOOLEAN NOT NULL DEFAULT FALSE,
    rerun_requested BOOLEAN NOT NULL DEFAULT FALSE
)
"#;

/// Job store backed by a Postgres table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Connect and ensure the jobs table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (shared with the queue backing).
    pub async fn with_pool(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn set_state(
        &self,
        job_id: &str,
        state: JobState,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE coursestat_jobs \
             SET state = $2, status_message = $3, finished_at = now() \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(state.as_str())
        .bind(message)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(job_id.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn flip_flags(
        &self,
        column: &str,
        old_id: &str,
        new_id: &str,
        set_new: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        clear_flag(&mut tx, column, old_id).await?;
        set_flag(&mut tx, column, new_id, set_new).await?;
        tx.commit().await?;
        Ok(())
    }
}

// `column` is always one of the two fixed flag names; never caller input.
async fn clear_flag(
    tx: &mut Transaction<'_, Postgres>,
    column: &str,
    job_id: &str,
) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE coursestat_jobs SET {column} = FALSE WHERE job_id = $1"
    );
    let result = sqlx::query(&sql).bind(job_id).execute(&mut **tx).await?;
    if result.rows_affected() != 1 {
        return Err(StoreError::NotFound(job_id.to_string()));
    }
    Ok(())
}

async fn set_flag(
    tx: &mut Transaction<'_, Postgres>,
    column: &str,
    job_id: &str,
    value: bool,
) -> Result<(), StoreError> {
    let sql = format!("UPDATE coursestat_jobs SET {column} = $2 WHERE job_id = $1");
    let result = sqlx::query(&sql)
        .bind(job_id)
        .bind(value)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() != 1 {
        return Err(StoreError::NotFound(job_id.to_string()));
    }
    Ok(())
}

fn row_to_job(row: &PgRow) -> Result<JobRow, StoreError> {
    let state: String = row.get("state");
    let state = JobState::parse(&state).ok_or(StoreError::InvalidState(state))?;
    Ok(JobRow {
        job_id: row.get("job_id"),
        job_type: row.get("job_type"),
        name: row.get("name"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        state,
        status_message: row.get("status_message"),
        descriptor: row.get("descriptor"),
        periodical: row.get("periodical"),
        rerun_requested: row.get("rerun_requested"),
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, row), fields(job_id = %row.job_id))]
    async fn insert_running(&self, row: JobRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO coursestat_jobs \
             (job_id, job_type, name, started_at, finished_at, state, \
              status_message, descriptor, periodical, rerun_requested) \
             VALUES ($1, $2, $3, $4, NULL, $5, NULL, $6, $7, FALSE) \
             ON CONFLICT (job_id) DO UPDATE SET \
                state = EXCLUDED.state, \
                started_at = EXCLUDED.started_at, \
                finished_at = NULL, \
                status_message = NULL, \
                descriptor = EXCLUDED.descriptor, \
                periodical = EXCLUDED.periodical",
        )
        .bind(&row.job_id)
        .bind(&row.job_type)
        .bind(&row.name)
        .bind(row.started_at)
        .bind(row.state.as_str())
        .bind(&row.descriptor)
        .bind(row.periodical)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM coursestat_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self, message))]
    async fn mark_finished(&self, job_id: &str, message: &str) -> Result<(), StoreError> {
        self.set_state(job_id, JobState::Finished, message).await
    }

    #[instrument(skip(self, message))]
    async fn mark_failed(&self, job_id: &str, message: &str) -> Result<(), StoreError> {
        self.set_state(job_id, JobState::Failed, message).await
    }

    async fn list_periodical(&self, job_type: &str) -> Result<Vec<JobRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM coursestat_jobs WHERE job_type = $1 AND periodical = TRUE",
        )
        .bind(job_type)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn list_rerun_requested(&self, job_type: &str) -> Result<Vec<JobRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM coursestat_jobs WHERE job_type = $1 AND rerun_requested = TRUE",
        )
        .bind(job_type)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn swap_periodical(
        &self,
        old_id: &str,
        new_id: &str,
        set_new: bool,
    ) -> Result<(), StoreError> {
        self.flip_flags("periodical", old_id, new_id, set_new).await
    }

    #[instrument(skip(self))]
    async fn clear_rerun(
        &self,
        old_id: &str,
        new_id: &str,
        set_new: bool,
    ) -> Result<(), StoreError> {
        self.flip_flags("rerun_requested", old_id, new_id, set_new)
            .await
    }
}
