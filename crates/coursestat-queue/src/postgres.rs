//! External transactional queue backing (Postgres).
//!
//! Ordering and durability are delegated to the database: rows are claimed
//! inside a transaction with `FOR UPDATE SKIP LOCKED`, so multiple daemon
//! processes can share one table without double delivery. Start-up is
//! asynchronous; [`PgQueue::connect`] must complete before the first
//! operation.
//!
//! `dequeue` registers a one-shot completion handle; a background delivery
//! task claims rows and resolves the oldest parked handle. `peek` is not
//! supported by this backing and always reports `None`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::waiters::WaiterState;
use crate::{JobQueue, QueueError, QueueItem};

/// Poll interval of the delivery task when no enqueue notification arrives.
const DELIVERY_TICK: Duration = Duration::from_millis(250);

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS coursestat_queue (
    id          BIGSERIAL PRIMARY KEY,
    queue       TEXT NOT NULL,
    payload     JSONB NOT NULL,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS coursestat_queue_by_name
    ON coursestat_queue (queue, id)
"#;

/// Queue backed by a Postgres table.
pub struct PgQueue<T: QueueItem> {
    pool: PgPool,
    queue_name: String,
    state: Arc<Mutex<WaiterState<T>>>,
    wakeup: Arc<Notify>,
    shutdown: CancellationToken,
}

impl<T: QueueItem> PgQueue<T> {
    /// Connect, ensure the queue table exists, and start the delivery task.
    pub async fn connect(connection: &str, queue_name: &str) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(connection)
            .await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;
        sqlx::query(CREATE_INDEX_SQL).execute(&pool).await?;

        let queue = Self {
            pool,
            queue_name: queue_name.to_string(),
            state: Arc::new(Mutex::new(WaiterState::new())),
            wakeup: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        };
        queue.spawn_delivery();
        Ok(queue)
    }

    fn spawn_delivery(&self) {
        let pool = self.pool.clone();
        let queue_name = self.queue_name.clone();
        let state = self.state.clone();
        let wakeup = self.wakeup.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = wakeup.notified() => {}
                    _ = tokio::time::sleep(DELIVERY_TICK) => {}
                }
                deliver_pending::<T>(&pool, &queue_name, &state).await;
            }
            debug!(queue = %queue_name, "delivery task stopped");
        });
    }
}

/// Resolve parked waiters while rows are available.
async fn deliver_pending<T: QueueItem>(
    pool: &PgPool,
    queue_name: &str,
    state: &Mutex<WaiterState<T>>,
) {
    loop {
        if !state.lock().await.has_waiters() {
            return;
        }
        match claim_one::<T>(pool, queue_name).await {
            Ok(Some(item)) => {
                if let Some(item) = state.lock().await.offer(item) {
                    // Every waiter vanished between the claim and the
                    // delivery; put the row back.
                    if let Err(e) = insert_item(pool, queue_name, &item).await {
                        warn!(queue = %queue_name, error = %e, "failed to restore unclaimed item");
                    }
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(queue = %queue_name, error = %e, "delivery claim failed");
                return;
            }
        }
    }
}

/// Claim and delete the oldest row for this queue inside one transaction.
async fn claim_one<T: QueueItem>(
    pool: &PgPool,
    queue_name: &str,
) -> Result<Option<T>, QueueError> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        "SELECT id, payload FROM coursestat_queue \
         WHERE queue = $1 ORDER BY id ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
    )
    .bind(queue_name)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    let id: i64 = row.get("id");
    let payload: serde_json::Value = row.get("payload");

    sqlx::query("DELETE FROM coursestat_queue WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Some(serde_json::from_value(payload)?))
}

async fn insert_item<T: QueueItem>(
    pool: &PgPool,
    queue_name: &str,
    item: &T,
) -> Result<(), QueueError> {
    let payload = serde_json::to_value(item)?;
    sqlx::query("INSERT INTO coursestat_queue (queue, payload) VALUES ($1, $2)")
        .bind(queue_name)
        .bind(payload)
        .execute(pool)
        .await?;
    Ok(())
}

#[async_trait]
impl<T: QueueItem> JobQueue<T> for PgQueue<T> {
    async fn enqueue(&self, item: T) -> Result<bool, QueueError> {
        if self.state.lock().await.closed {
            return Err(QueueError::Closed);
        }
        insert_item(&self.pool, &self.queue_name, &item).await?;
        self.wakeup.notify_one();
        Ok(true)
    }

    async fn dequeue(&self) -> Result<T, QueueError> {
        let rx = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.park()
        };
        self.wakeup.notify_one();
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Not supported by the external backing; always `None`.
    async fn peek(&self) -> Result<Option<T>, QueueError> {
        Ok(None)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM coursestat_queue WHERE queue = $1")
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.state.lock().await.close();
    }
}
