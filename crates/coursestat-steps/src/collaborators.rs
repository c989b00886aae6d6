//! Domain collaborators the statistics steps depend on.
//!
//! The steps never touch tables or formulas directly; they go through
//! these traits so tests can substitute fixtures and the daemon can wire
//! the Postgres-backed repository at startup.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::StatsError;

/// One learner's answer to one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResponse {
    pub user_id: i64,
    pub item_id: String,
    pub correct: bool,
}

/// All recorded responses for one course.
#[derive(Debug, Clone)]
pub struct ResponseMatrix {
    pub id_course: i64,
    pub responses: Vec<ItemResponse>,
}

impl ResponseMatrix {
    /// Distinct item ids, in first-seen order.
    pub fn item_ids(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for response in &self.responses {
            if !seen.contains(&response.item_id.as_str()) {
                seen.push(response.item_id.as_str());
            }
        }
        seen
    }

    /// Total correct count per user.
    pub fn total_scores(&self) -> HashMap<i64, u32> {
        let mut scores: HashMap<i64, u32> = HashMap::new();
        for response in &self.responses {
            let entry = scores.entry(response.user_id).or_default();
            if response.correct {
                *entry += 1;
            }
        }
        scores
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// Estimated parameters for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemParameters {
    pub item_id: String,
    /// Proportion of correct answers.
    pub p_value: f64,
    /// Item difficulty on the logit scale; higher is harder.
    pub difficulty: f64,
    /// Point-biserial correlation with the total score.
    pub discrimination: f64,
}

/// Access to response data and calculated statistics.
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// When statistics for this course were last calculated.
    async fn last_calculated_at(&self, id_course: i64)
        -> Result<Option<DateTime<Utc>>, StatsError>;

    /// Timestamp of the newest recorded response for this course.
    async fn latest_response_at(&self, id_course: i64)
        -> Result<Option<DateTime<Utc>>, StatsError>;

    /// Load the full response matrix for a course.
    async fn load_responses(&self, id_course: i64) -> Result<ResponseMatrix, StatsError>;

    /// Persist (replace) the calculated statistics document.
    async fn store_statistics(&self, id_course: i64, stats: &Value) -> Result<(), StatsError>;
}

/// Estimates item parameters from a response matrix.
pub trait IrtScorer: Send + Sync {
    fn estimate(&self, matrix: &ResponseMatrix) -> Result<Vec<ItemParameters>, StatsError>;
}

/// Difficulty band an item falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyBand {
    Easy,
    Moderate,
    Hard,
}

impl DifficultyBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyBand::Easy => "easy",
            DifficultyBand::Moderate => "moderate",
            DifficultyBand::Hard => "hard",
        }
    }
}

/// Assigns items to difficulty bands.
pub trait DifficultyClassifier: Send + Sync {
    fn classify(&self, item: &ItemParameters) -> DifficultyBand;
}

/// One-parameter logistic estimation.
///
/// Difficulty is the logit of the failure rate; discrimination is the
/// point-biserial correlation between item correctness and total score.
/// Extreme p-values are clamped so the logit stays finite.
pub struct LogisticIrtScorer;

impl LogisticIrtScorer {
    fn clamp_p(p: f64, n: f64) -> f64 {
        // Laplace-style bounds: never exactly 0 or 1.
        p.clamp(1.0 / (n + 1.0), n / (n + 1.0))
    }
}

impl IrtScorer for LogisticIrtScorer {
    fn estimate(&self, matrix: &ResponseMatrix) -> Result<Vec<ItemParameters>, StatsError> {
        if matrix.is_empty() {
            return Err(StatsError::NoResponses(matrix.id_course));
        }

        let totals = matrix.total_scores();
        let all_scores: Vec<f64> = totals.values().map(|s| f64::from(*s)).collect();
        let mean_total = all_scores.iter().sum::<f64>() / all_scores.len() as f64;
        let var_total = all_scores
            .iter()
            .map(|s| (s - mean_total).powi(2))
            .sum::<f64>()
            / all_scores.len() as f64;
        let sd_total = var_total.sqrt();

        let mut parameters = Vec::new();
        for item_id in matrix.item_ids() {
            let answers: Vec<&ItemResponse> = matrix
                .responses
                .iter()
                .filter(|r| r.item_id == item_id)
                .collect();
            let n = answers.len() as f64;
            let correct = answers.iter().filter(|r| r.correct).count() as f64;
            let p = Self::clamp_p(correct / n, n);
            let difficulty = ((1.0 - p) / p).ln();

            let discrimination = if sd_total > f64::EPSILON {
                let mean_correct: f64 = answers
                    .iter()
                    .filter(|r| r.correct)
                    .map(|r| f64::from(totals[&r.user_id]))
                    .sum::<f64>()
                    / correct.max(1.0);
                let incorrect = n - correct;
                let mean_incorrect: f64 = answers
                    .iter()
                    .filter(|r| !r.correct)
                    .map(|r| f64::from(totals[&r.user_id]))
                    .sum::<f64>()
                    / incorrect.max(1.0);
                if correct == 0.0 || incorrect == 0.0 {
                    0.0
                } else {
                    (mean_correct - mean_incorrect) / sd_total * (p * (1.0 - p)).sqrt()
                }
            } else {
                0.0
            };

            parameters.push(ItemParameters {
                item_id: item_id.to_string(),
                p_value: correct / n,
                difficulty,
                discrimination,
            });
        }
        Ok(parameters)
    }
}

/// Fixed logit thresholds on the estimated difficulty.
pub struct ThresholdClassifier {
    pub easy_below: f64,
    pub hard_above: f64,
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self {
            easy_below: -0.5,
            hard_above: 0.5,
        }
    }
}

impl DifficultyClassifier for ThresholdClassifier {
    fn classify(&self, item: &ItemParameters) -> DifficultyBand {
        if item.difficulty < self.easy_below {
            DifficultyBand::Easy
        } else if item.difficulty > self.hard_above {
            DifficultyBand::Hard
        } else {
            DifficultyBand::Moderate
        }
    }
}

#[derive(Default)]
struct CourseRecord {
    responses: Vec<ItemResponse>,
    latest_response_at: Option<DateTime<Utc>>,
    statistics: Option<(Value, DateTime<Utc>)>,
}

/// In-memory repository for tests and local runs.
#[derive(Default)]
pub struct MemoryStatsRepository {
    courses: Mutex<HashMap<i64, CourseRecord>>,
}

impl MemoryStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed responses for a course, stamping the latest-response time.
    pub fn seed_responses(
        &self,
        id_course: i64,
        responses: Vec<ItemResponse>,
        latest_response_at: DateTime<Utc>,
    ) {
        let mut courses = self.courses.lock().unwrap();
        let record = courses.entry(id_course).or_default();
        record.responses = responses;
        record.latest_response_at = Some(latest_response_at);
    }

    /// Pretend statistics were calculated at the given time.
    pub fn seed_calculated_at(&self, id_course: i64, calculated_at: DateTime<Utc>) {
        let mut courses = self.courses.lock().unwrap();
        let record = courses.entry(id_course).or_default();
        record.statistics = Some((Value::Null, calculated_at));
    }

    /// The last statistics document stored for a course, if any.
    pub fn stored_statistics(&self, id_course: i64) -> Option<Value> {
        self.courses
            .lock()
            .unwrap()
            .get(&id_course)
            .and_then(|record| record.statistics.as_ref().map(|(stats, _)| stats.clone()))
    }
}

#[async_trait]
impl StatsRepository for MemoryStatsRepository {
    async fn last_calculated_at(
        &self,
        id_course: i64,
    ) -> Result<Option<DateTime<Utc>>, StatsError> {
        Ok(self
            .courses
            .lock()
            .unwrap()
            .get(&id_course)
            .and_then(|record| record.statistics.as_ref().map(|(_, at)| *at)))
    }

    async fn latest_response_at(
        &self,
        id_course: i64,
    ) -> Result<Option<DateTime<Utc>>, StatsError> {
        Ok(self
            .courses
            .lock()
            .unwrap()
            .get(&id_course)
            .and_then(|record| record.latest_response_at))
    }

    async fn load_responses(&self, id_course: i64) -> Result<ResponseMatrix, StatsError> {
        let responses = self
            .courses
            .lock()
            .unwrap()
            .get(&id_course)
            .map(|record| record.responses.clone())
            .unwrap_or_default();
        Ok(ResponseMatrix {
            id_course,
            responses,
        })
    }

    async fn store_statistics(&self, id_course: i64, stats: &Value) -> Result<(), StatsError> {
        let mut courses = self.courses.lock().unwrap();
        let record = courses.entry(id_course).or_default();
        record.statistics = Some((stats.clone(), Utc::now()));
        Ok(())
    }
}
