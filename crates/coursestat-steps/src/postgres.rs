//! Postgres statistics repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::{ItemResponse, ResponseMatrix, StatsError, StatsRepository};

const CREATE_RESPONSES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS course_responses (
    id          BIGSERIAL PRIMARY KEY,
    id_course   BIGINT NOT NULL,
    item_id     TEXT NOT NULL,
    user_id     BIGINT NOT NULL,
    correct     BOOLEAN NOT NULL,
    answered_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_STATISTICS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS course_statistics (
    id_course     BIGINT PRIMARY KEY,
    statistics    JSONB NOT NULL,
    calculated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Repository backed by the `course_responses` and `course_statistics`
/// tables.
#[derive(Clone)]
pub struct PgStatsRepository {
    pool: PgPool,
}

impl PgStatsRepository {
    /// Connect and ensure the statistics tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, StatsError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool (shared with the job store).
    pub async fn with_pool(pool: PgPool) -> Result<Self, StatsError> {
        sqlx::query(CREATE_RESPONSES_SQL).execute(&pool).await?;
        sqlx::query(CREATE_STATISTICS_SQL).execute(&pool).await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS course_responses_course_idx \
             ON course_responses (id_course)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StatsRepository for PgStatsRepository {
    async fn last_calculated_at(
        &self,
        id_course: i64,
    ) -> Result<Option<DateTime<Utc>>, StatsError> {
        let row = sqlx::query(
            "SELECT calculated_at FROM course_statistics WHERE id_course = $1",
        )
        .bind(id_course)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("calculated_at")))
    }

    async fn latest_response_at(
        &self,
        id_course: i64,
    ) -> Result<Option<DateTime<Utc>>, StatsError> {
        let row = sqlx::query(
            "SELECT max(answered_at) AS latest FROM course_responses WHERE id_course = $1",
        )
        .bind(id_course)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("latest"))
    }

    #[instrument(skip(self))]
    async fn load_responses(&self, id_course: i64) -> Result<ResponseMatrix, StatsError> {
        let rows = sqlx::query(
            "SELECT user_id, item_id, correct FROM course_responses \
             WHERE id_course = $1 ORDER BY id",
        )
        .bind(id_course)
        .fetch_all(&self.pool)
        .await?;

        let responses = rows
            .iter()
            .map(|row| ItemResponse {
                user_id: row.get("user_id"),
                item_id: row.get("item_id"),
                correct: row.get("correct"),
            })
            .collect();
        Ok(ResponseMatrix {
            id_course,
            responses,
        })
    }

    #[instrument(skip(self, stats))]
    async fn store_statistics(&self, id_course: i64, stats: &Value) -> Result<(), StatsError> {
        sqlx::query(
            "INSERT INTO course_statistics (id_course, statistics, calculated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (id_course) DO UPDATE SET \
                statistics = EXCLUDED.statistics, \
                calculated_at = now()",
        )
        .bind(id_course)
        .bind(stats)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
