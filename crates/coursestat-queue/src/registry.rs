//! Queue lookup registry.
//!
//! An explicit registry object constructed once at startup and passed by
//! reference to every component that needs queue lookups. Queues carry
//! different item types, so handles are stored type-erased and recovered
//! through a typed `get`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{JobQueue, QueueItem};

/// Name -> queue handle lookup.
#[derive(Default)]
pub struct QueueRegistry {
    queues: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue under `name`, replacing any previous entry.
    pub fn register<T: QueueItem>(&self, name: &str, queue: Arc<dyn JobQueue<T>>) {
        let mut queues = self.queues.write().unwrap();
        queues.insert(name.to_string(), Arc::new(queue));
    }

    /// Look up a queue by name and item type.
    ///
    /// Returns `None` when the name is unknown or registered with a
    /// different item type.
    pub fn get<T: QueueItem>(&self, name: &str) -> Option<Arc<dyn JobQueue<T>>> {
        let queues = self.queues.read().unwrap();
        queues
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Arc<dyn JobQueue<T>>>())
            .cloned()
    }

    /// Registered queue names.
    pub fn names(&self) -> Vec<String> {
        let queues = self.queues.read().unwrap();
        queues.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileQueue;

    #[tokio::test]
    async fn test_register_and_typed_get() {
        let dir = tempfile::tempdir().unwrap();
        let registry = QueueRegistry::new();

        let queue: Arc<dyn JobQueue<u32>> =
            Arc::new(FileQueue::new(dir.path().join("numbers.queue")));
        registry.register("numbers", queue);

        let found = registry.get::<u32>("numbers").expect("queue registered");
        found.enqueue(11).await.unwrap();
        assert_eq!(found.dequeue().await.unwrap(), 11);
    }

    #[test]
    fn test_wrong_type_or_name_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = QueueRegistry::new();

        let queue: Arc<dyn JobQueue<u32>> =
            Arc::new(FileQueue::new(dir.path().join("numbers.queue")));
        registry.register("numbers", queue);

        assert!(registry.get::<String>("numbers").is_none());
        assert!(registry.get::<u32>("letters").is_none());
    }

    #[test]
    fn test_names_lists_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let registry = QueueRegistry::new();
        let queue: Arc<dyn JobQueue<u32>> =
            Arc::new(FileQueue::new(dir.path().join("a.queue")));
        registry.register("incoming", queue);

        assert_eq!(registry.names(), vec!["incoming".to_string()]);
    }
}
