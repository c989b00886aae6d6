//! Job status persistence.
//!
//! The database is the single source of truth for job status. The
//! [`JobStore`] trait exposes coarse-grained operations that each
//! implementation makes atomic: the Postgres store wraps multi-row updates
//! in one transaction and rolls back on any error, the in-memory store
//! mutates under a single lock.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;

use coursestat_types::JobRow;

pub use error::StoreError;
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Persistence contract for job lifecycle rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert (or reset) a `RUNNING` row for a freshly provided job.
    ///
    /// Upserts by job id: a watchdog reset re-provides the same id, which
    /// must land back on a clean running row.
    async fn insert_running(&self, row: JobRow) -> Result<(), StoreError>;

    /// Fetch one row by id.
    async fn get(&self, job_id: &str) -> Result<Option<JobRow>, StoreError>;

    /// Mark a job `FINISHED` with a status message.
    async fn mark_finished(&self, job_id: &str, message: &str) -> Result<(), StoreError>;

    /// Mark a job `FAILED` with a status message.
    async fn mark_failed(&self, job_id: &str, message: &str) -> Result<(), StoreError>;

    /// All rows of the given type flagged `periodical`.
    async fn list_periodical(&self, job_type: &str) -> Result<Vec<JobRow>, StoreError>;

    /// All rows of the given type flagged `rerun_requested`.
    async fn list_rerun_requested(&self, job_type: &str) -> Result<Vec<JobRow>, StoreError>;

    /// Atomically clear the old row's `periodical` flag and set the new
    /// row's flag to `set_new`. All-or-nothing: on any error neither row
    /// changes.
    async fn swap_periodical(
        &self,
        old_id: &str,
        new_id: &str,
        set_new: bool,
    ) -> Result<(), StoreError>;

    /// Atomically clear the old row's `rerun_requested` flag and set the
    /// new row's flag to `set_new`. All-or-nothing.
    async fn clear_rerun(
        &self,
        old_id: &str,
        new_id: &str,
        set_new: bool,
    ) -> Result<(), StoreError>;
}
