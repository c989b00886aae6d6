//! Directory queue backing.
//!
//! Each item is one file under the queue directory, named by a
//! configurable `prefix + name + sequence + suffix` scheme. Items are read
//! back in ascending file-creation order; a bounded retry loop resolves
//! filename collisions by bumping the sequence.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::waiters::WaiterState;
use crate::{JobQueue, QueueError, QueueItem};

/// Retry budget for the collision-rename loop.
const MAX_NAME_ATTEMPTS: u32 = 8;

/// Queue persisted as one file per item.
pub struct DirQueue<T: QueueItem> {
    dir: PathBuf,
    prefix: String,
    suffix: String,
    file_stem: String,
    seq: AtomicU64,
    state: Mutex<WaiterState<T>>,
}

impl<T: QueueItem> DirQueue<T> {
    /// Create a queue over `dir` with the given naming scheme. The
    /// directory is created lazily on the first enqueue.
    pub fn new(dir: impl AsRef<Path>, prefix: &str, name: &str, suffix: &str) -> Self {
        // Seed the sequence from the clock so names stay monotonic across
        // restarts; zero-padding keeps lexical order as the tiebreaker for
        // identical creation times.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            file_stem: name.to_string(),
            seq: AtomicU64::new(seed),
            state: Mutex::new(WaiterState::new()),
        }
    }

    fn matches_scheme(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix) && file_name.ends_with(&self.suffix)
    }

    async fn write_item(&self, item: &T) -> Result<(), QueueError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec(item)?;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            let file_name = format!("{}{}{:020}{}", self.prefix, self.file_stem, seq, self.suffix);
            let path = self.dir.join(file_name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&bytes).await?;
                    file.flush().await?;
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "item name collision, bumping sequence");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(QueueError::NameCollision {
            dir: self.dir.display().to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// List item files ordered by creation time ascending, filename as the
    /// tiebreaker.
    async fn entries(&self) -> Result<Vec<(SystemTime, PathBuf)>, QueueError> {
        let mut found = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !self.matches_scheme(&file_name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            // Creation time where the platform reports it, mtime otherwise.
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(UNIX_EPOCH);
            found.push((created, entry.path()));
        }
        found.sort();
        Ok(found)
    }

    async fn read_oldest(&self, remove: bool) -> Result<Option<T>, QueueError> {
        let entries = self.entries().await?;
        let Some((_, path)) = entries.into_iter().next() else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path).await?;
        let item = serde_json::from_slice(&bytes)?;
        if remove {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(Some(item))
    }
}

#[async_trait]
impl<T: QueueItem> JobQueue<T> for DirQueue<T> {
    async fn enqueue(&self, item: T) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        let item = match state.offer(item) {
            None => return Ok(true),
            Some(item) => item,
        };
        self.write_item(&item).await?;
        Ok(true)
    }

    async fn dequeue(&self) -> Result<T, QueueError> {
        let rx = {
            let mut state = self.state.lock().await;
            if let Some(item) = self.read_oldest(true).await? {
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
        self.read_oldest(false).await
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let _state = self.state.lock().await;
        for (_, path) in self.entries().await? {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn queue_in(dir: &tempfile::TempDir) -> Arc<DirQueue<String>> {
        Arc::new(DirQueue::new(dir.path(), "item-", "entry", ".json"))
    }

    #[tokio::test]
    async fn test_fifo_order_by_creation() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        queue.enqueue("first".to_string()).await.unwrap();
        queue.enqueue("second".to_string()).await.unwrap();
        queue.enqueue("third".to_string()).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), "first");
        assert_eq!(queue.dequeue().await.unwrap(), "second");
        assert_eq!(queue.dequeue().await.unwrap(), "third");
    }

    #[tokio::test]
    async fn test_items_are_individual_files() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        queue.enqueue("a".to_string()).await.unwrap();
        queue.enqueue("b".to_string()).await.unwrap();

        let mut count = 0;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name();
            let name = name.to_string_lossy().to_string();
            assert!(name.starts_with("item-entry"));
            assert!(name.ends_with(".json"));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_foreign_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        std::fs::write(dir.path().join("README.txt"), "not an item").unwrap();
        queue.enqueue("real".to_string()).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), "real");
        assert_eq!(queue.peek().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_waiter_resolved_directly_on_enqueue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        let parked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.enqueue("direct".to_string()).await.unwrap();
        let got = timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got, "direct");

        // Nothing reached the directory.
        assert_eq!(queue.peek().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_drains_all_parked_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        let mut parked = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            parked.push(tokio::spawn(async move { queue.dequeue().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close().await;
        for handle in parked {
            let result = timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(QueueError::Closed)));
        }
    }

    #[tokio::test]
    async fn test_clear_removes_only_scheme_files() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);

        std::fs::write(dir.path().join("keep.me"), "untouched").unwrap();
        queue.enqueue("a".to_string()).await.unwrap();
        queue.enqueue("b".to_string()).await.unwrap();

        queue.clear().await.unwrap();
        assert_eq!(queue.peek().await.unwrap(), None);
        assert!(dir.path().join("keep.me").exists());
    }
}
