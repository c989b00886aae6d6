//! Input formatting for course-statistics jobs.

use async_trait::async_trait;
use serde_json::Value;

use coursestat_engine::{EngineError, InputFormatter};
use coursestat_types::JobConfiguration;

/// Hands the job's `input_config` to the pipeline as the initial payload.
///
/// The parser already shaped the input document, so formatting is a
/// validation pass: the payload must be an object carrying a course id.
pub struct CourseInputFormatter;

#[async_trait]
impl InputFormatter for CourseInputFormatter {
    async fn format_job_input(&self, config: &JobConfiguration) -> Result<Value, EngineError> {
        let input = &config.input_config;
        if !input.is_object() {
            return Err(EngineError::InputFormat(format!(
                "job {} has no input document",
                config.job_id
            )));
        }
        if input.get("id_course").and_then(Value::as_i64).is_none() {
            return Err(EngineError::InputFormat(format!(
                "job {} input has no course id",
                config.job_id
            )));
        }
        Ok(input.clone())
    }
}
