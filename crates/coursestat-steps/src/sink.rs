//! Result persistence through the statistics repository.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use coursestat_engine::{EngineError, ResultSink};
use coursestat_types::JobConfiguration;

use crate::StatsRepository;

/// Writes the final statistics document back through the repository.
pub struct RepositoryResultSink {
    repository: Arc<dyn StatsRepository>,
}

impl RepositoryResultSink {
    pub fn new(repository: Arc<dyn StatsRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl ResultSink for RepositoryResultSink {
    async fn persist_result(
        &self,
        result: &Value,
        config: &JobConfiguration,
    ) -> Result<bool, EngineError> {
        // The result document carries the id; fall back to the persistence
        // config for regenerated jobs.
        let id_course = result
            .get("id_course")
            .or_else(|| config.persistence_config.get("id_course"))
            .and_then(Value::as_i64);
        let Some(id_course) = id_course else {
            return Err(EngineError::Persistence(format!(
                "job {} result has no course id",
                config.job_id
            )));
        };

        self.repository
            .store_statistics(id_course, result)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        info!(job = %config.job_id, id_course, "statistics persisted");
        Ok(true)
    }
}
