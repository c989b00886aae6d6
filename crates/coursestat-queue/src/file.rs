//! Single-file queue backing.
//!
//! The entire queue is one serialized JSON list persisted to one file. A
//! `tokio::sync::Mutex` serializes enqueue/dequeue/clear so they never
//! interleave destructively; the file is only touched while the lock is
//! held.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::waiters::WaiterState;
use crate::{JobQueue, QueueError, QueueItem};

/// Queue persisted as one JSON file.
pub struct FileQueue<T: QueueItem> {
    path: PathBuf,
    state: Mutex<WaiterState<T>>,
}

impl<T: QueueItem> FileQueue<T> {
    /// Create a queue over the given file. The file is created lazily on
    /// the first enqueue that reaches storage.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(WaiterState::new()),
        }
    }

    async fn load(&self) -> Result<Vec<T>, QueueError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, items: &[T]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(items)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: QueueItem> JobQueue<T> for FileQueue<T> {
    async fn enqueue(&self, item: T) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        // Oldest parked waiter gets the item directly; skipping the file
        // write avoids the write-then-immediate-read race.
        let item = match state.offer(item) {
            None => {
                debug!(path = %self.path.display(), "item handed to parked waiter");
                return Ok(true);
            }
            Some(item) => item,
        };
        let mut items = self.load().await?;
        items.push(item);
        self.store(&items).await?;
        Ok(true)
    }

    async fn dequeue(&self) -> Result<T, QueueError> {
        let rx = {
            let mut state = self.state.lock().await;
            let mut items = self.load().await?;
            if !items.is_empty() {
                let item = items.remove(0);
                self.store(&items).await?;
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.park()
        };
        rx.await.map_err(|_| QueueError::Closed)
    }

    async fn peek(&self) -> Result<Option<T>, QueueError> {
        let _state = self.state.lock().await;
        let items = self.load().await?;
        Ok(items.into_iter().next())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let _state = self.state.lock().await;
        self.store(&[]).await
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.close();
    }
}
