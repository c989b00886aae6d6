//! In-memory job store for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use coursestat_types::{JobRow, JobState};

use crate::{JobStore, StoreError};

/// Job store held in a single mutex-guarded map.
///
/// Every trait operation runs under one lock acquisition, so the
/// all-or-nothing guarantees hold by construction.
#[derive(Default)]
pub struct MemoryJobStore {
    rows: Mutex<HashMap<String, JobRow>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored row, in no particular order.
    pub fn all_rows(&self) -> Vec<JobRow> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// Flip one row's `rerun_requested` flag directly, standing in for
    /// the external system that requests recalculations.
    pub fn set_rerun_requested(&self, job_id: &str, value: bool) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(job_id) {
            row.rerun_requested = value;
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_running(&self, row: JobRow) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(row.job_id.clone(), row);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRow>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(job_id).cloned())
    }

    async fn mark_finished(&self, job_id: &str, message: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        row.state = JobState::Finished;
        row.finished_at = Some(Utc::now());
        row.status_message = Some(message.to_string());
        Ok(())
    }

    async fn mark_failed(&self, job_id: &str, message: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        row.state = JobState::Failed;
        row.finished_at = Some(Utc::now());
        row.status_message = Some(message.to_string());
        Ok(())
    }

    async fn list_periodical(&self, job_type: &str) -> Result<Vec<JobRow>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|row| row.job_type == job_type && row.periodical)
            .cloned()
            .collect())
    }

    async fn list_rerun_requested(&self, job_type: &str) -> Result<Vec<JobRow>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|row| row.job_type == job_type && row.rerun_requested)
            .cloned()
            .collect())
    }

    async fn swap_periodical(
        &self,
        old_id: &str,
        new_id: &str,
        set_new: bool,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        // Validate both rows before touching either, so a missing row
        // leaves the other untouched.
        if !rows.contains_key(old_id) {
            return Err(StoreError::NotFound(old_id.to_string()));
        }
        if !rows.contains_key(new_id) {
            return Err(StoreError::NotFound(new_id.to_string()));
        }
        rows.get_mut(old_id).unwrap().periodical = false;
        rows.get_mut(new_id).unwrap().periodical = set_new;
        Ok(())
    }

    async fn clear_rerun(
        &self,
        old_id: &str,
        new_id: &str,
        set_new: bool,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(old_id) {
            return Err(StoreError::NotFound(old_id.to_string()));
        }
        if !rows.contains_key(new_id) {
            return Err(StoreError::NotFound(new_id.to_string()));
        }
        rows.get_mut(old_id).unwrap().rerun_requested = false;
        rows.get_mut(new_id).unwrap().rerun_requested = set_new;
        Ok(())
    }
}
