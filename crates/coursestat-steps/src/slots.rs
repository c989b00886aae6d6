//! Helpers for reading the prior-result window.

use serde_json::Value;

use coursestat_types::InputSlot;
use coursestat_worker::StepError;

/// Most recent slot whose payload carries `key`.
pub(crate) fn find_field<'a>(prior: &'a [InputSlot], key: &str) -> Option<&'a Value> {
    prior.iter().find_map(|slot| slot.payload.get(key))
}

/// The course id from the nearest slot that carries one. Every payload in
/// a course-statistics pipeline (including the job input) has it.
pub(crate) fn course_id(prior: &[InputSlot]) -> Result<i64, StepError> {
    find_field(prior, "id_course")
        .and_then(Value::as_i64)
        .ok_or_else(|| StepError::Precondition("no course id in prior results".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_course_id_prefers_most_recent() {
        let prior = vec![
            InputSlot::new(json!({"id_course": 9}), 1),
            InputSlot::unbounded(json!({"id_course": 7})),
        ];
        assert_eq!(course_id(&prior).unwrap(), 9);
    }

    #[test]
    fn test_course_id_skips_payloads_without_field() {
        let prior = vec![
            InputSlot::new(json!({"items": []}), 1),
            InputSlot::unbounded(json!({"id_course": 7})),
        ];
        assert_eq!(course_id(&prior).unwrap(), 7);
    }

    #[test]
    fn test_course_id_missing() {
        let prior = vec![InputSlot::new(json!({"items": []}), 1)];
        assert!(matches!(
            course_id(&prior),
            Err(StepError::Precondition(_))
        ));
        assert!(course_id(&[]).is_err());
    }
}
