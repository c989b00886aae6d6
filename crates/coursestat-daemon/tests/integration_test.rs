//! Integration tests for the course-statistics daemon.
//!
//! These tests assemble a full daemon over file-backed queues and the
//! in-memory store and repository, then drive it through the incoming
//! queue the way an external caller would.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use coursestat_daemon::{Daemon, INCOMING_QUEUE};
use coursestat_queue::{open_queue, JobQueue};
use coursestat_steps::{ItemResponse, MemoryStatsRepository, StatsRepository};
use coursestat_store::{JobStore, MemoryJobStore};
use coursestat_types::{
    JobRequest, JobRow, JobState, QueueDescriptor, ScanInterval, Settings,
};

/// Test harness that manages daemon lifecycle.
struct TestHarness {
    _temp_dir: TempDir,
    store: Arc<MemoryJobStore>,
    repository: Arc<MemoryStatsRepository>,
    incoming: Arc<dyn JobQueue<JobRequest>>,
    shutdown: CancellationToken,
    daemon_handle: tokio::task::JoinHandle<()>,
}

impl TestHarness {
    async fn new(settings_tweak: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut settings = Settings {
            incoming_queue: QueueDescriptor::File {
                location: temp_dir
                    .path()
                    .join("incoming.queue")
                    .display()
                    .to_string(),
            },
            work_queue: QueueDescriptor::File {
                location: temp_dir.path().join("work.queue").display().to_string(),
            },
            max_concurrent_calculations: 1,
            ..Settings::default()
        };
        settings_tweak(&mut settings);

        let store = Arc::new(MemoryJobStore::new());
        let repository = Arc::new(MemoryStatsRepository::new());
        seed_course(&repository, 7);

        let incoming = open_queue::<JobRequest>(&settings.incoming_queue, INCOMING_QUEUE)
            .await
            .expect("Failed to open incoming queue");

        let shutdown = CancellationToken::new();
        let force = CancellationToken::new();
        let daemon = Daemon::new(settings, store.clone(), repository.clone());
        let token = shutdown.clone();
        let daemon_handle = tokio::spawn(async move {
            daemon.run(token, force).await.expect("daemon failed");
        });

        // Let the daemon open its queues and park its runners.
        sleep(Duration::from_millis(100)).await;

        Self {
            _temp_dir: temp_dir,
            store,
            repository,
            incoming,
            shutdown,
            daemon_handle,
        }
    }

    async fn submit(&self, payload: serde_json::Value) {
        self.incoming
            .enqueue(JobRequest::new(payload))
            .await
            .expect("Failed to enqueue request");
    }

    /// Poll the store until a row of the given type reaches a terminal
    /// state, or time out.
    async fn wait_for_settled_row(&self) -> JobRow {
        for _ in 0..100 {
            let rows = self.store.all_rows();
            if let Some(row) = rows
                .iter()
                .find(|r| matches!(r.state, JobState::Finished | JobState::Failed))
            {
                return row.clone();
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("no job settled within the timeout");
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.daemon_handle.await.expect("daemon panicked");
    }
}

fn seed_course(repository: &MemoryStatsRepository, id_course: i64) {
    let response = |user_id, item_id: &str, correct| ItemResponse {
        user_id,
        item_id: item_id.to_string(),
        correct,
    };
    repository.seed_responses(
        id_course,
        vec![
            response(1, "a", true),
            response(1, "b", true),
            response(2, "a", true),
            response(2, "b", false),
            response(3, "a", false),
            response(3, "b", false),
        ],
        chrono::Utc::now() - chrono::Duration::hours(1),
    );
}

#[tokio::test]
async fn test_request_runs_to_statistics() {
    let harness = TestHarness::new(|_| {}).await;

    harness
        .submit(json!({"id_course": 7, "force_calculation": false}))
        .await;

    let row = harness.wait_for_settled_row().await;
    assert_eq!(row.state, JobState::Finished);
    assert_eq!(row.job_type, "course_statistics");
    assert_eq!(row.name, "course statistics #7");

    let stats = harness
        .repository
        .stored_statistics(7)
        .expect("statistics persisted");
    assert_eq!(stats["id_course"], 7);
    assert_eq!(stats["score_distribution"]["participants"], 3);

    harness.stop().await;
}

#[tokio::test]
async fn test_fresh_course_settles_as_clean_cancellation() {
    let harness = TestHarness::new(|_| {}).await;
    // Statistics newer than the newest response.
    harness
        .repository
        .seed_calculated_at(7, chrono::Utc::now());

    harness
        .submit(json!({"id_course": 7, "force_calculation": false}))
        .await;

    let row = harness.wait_for_settled_row().await;
    // A chain cancellation is a clean completion, never a failure.
    assert_eq!(row.state, JobState::Finished);
    assert!(row
        .status_message
        .as_deref()
        .unwrap()
        .contains("already calculated"));

    harness.stop().await;
}

#[tokio::test]
async fn test_invalid_request_is_rejected_without_job_row() {
    let harness = TestHarness::new(|_| {}).await;

    harness.submit(json!({"wrong_field": true})).await;
    harness
        .submit(json!({"id_course": 7, "force_calculation": true}))
        .await;

    // Only the valid request produced a row.
    let row = harness.wait_for_settled_row().await;
    assert_eq!(row.state, JobState::Finished);
    assert_eq!(harness.store.all_rows().len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_refresh_sweep_regenerates_periodical_job() {
    let harness = TestHarness::new(|settings| {
        settings.refresh_scan = ScanInterval::from_secs(1);
    })
    .await;

    // A finished periodical job from a past run.
    harness
        .submit(json!({"id_course": 7, "force_calculation": true, "periodical": true}))
        .await;
    let old_row = harness.wait_for_settled_row().await;
    assert!(old_row.periodical);

    // Wait past the sweep interval for the replacement to run and the
    // flag to move.
    let mut moved = None;
    for _ in 0..200 {
        let periodical = harness
            .store
            .list_periodical("course_statistics")
            .await
            .unwrap();
        if let Some(row) = periodical.iter().find(|r| r.job_id != old_row.job_id) {
            moved = Some(row.clone());
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    let new_row = moved.expect("sweep never produced a replacement");
    assert_eq!(new_row.state, JobState::Finished);

    // Old row's flag was cleared in the same flip.
    let old = harness
        .store
        .get(&old_row.job_id)
        .await
        .unwrap()
        .expect("old row still present");
    assert!(!old.periodical);

    harness.stop().await;
}

#[tokio::test]
async fn test_recalculation_sweep_clears_rerun_flag() {
    let harness = TestHarness::new(|settings| {
        settings.recalculation_scan = ScanInterval::from_secs(1);
    })
    .await;

    // A finished job whose rerun was requested externally.
    harness
        .submit(json!({"id_course": 7, "force_calculation": true}))
        .await;
    let old_row = harness.wait_for_settled_row().await;
    harness.store.set_rerun_requested(&old_row.job_id, true);

    // The sweep must run the replacement and clear the flag.
    let mut cleared = false;
    for _ in 0..200 {
        let flagged = harness
            .store
            .list_rerun_requested("course_statistics")
            .await
            .unwrap();
        if flagged.is_empty() {
            cleared = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(cleared, "rerun flag never cleared");
    // Replacement ran with a fresh id.
    assert!(harness.store.all_rows().len() >= 2);

    harness.stop().await;
}

#[tokio::test]
async fn test_graceful_shutdown_stops_daemon() {
    let harness = TestHarness::new(|_| {}).await;
    // No work submitted; shutdown must still drain promptly.
    harness.stop().await;
}
