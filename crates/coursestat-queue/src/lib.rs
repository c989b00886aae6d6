//! Pluggable queue abstraction with blocking dequeue semantics.
//!
//! Three interchangeable backings implement the same contract:
//!
//! - [`FileQueue`]: the whole queue is one serialized list in a single file.
//! - [`DirQueue`]: one file per item, ordered by file creation time.
//! - [`PgQueue`]: delegates ordering and durability to a Postgres table.
//!
//! All backings share the waiter short-circuit: a `dequeue` on an empty
//! queue parks the caller in an in-memory waiter list, and the next
//! `enqueue` resolves the oldest parked waiter directly instead of writing
//! the item to storage first. Closing a queue rejects every parked waiter
//! with [`QueueError::Closed`].

mod dir;
mod error;
mod file;
mod postgres;
mod registry;
mod waiters;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use coursestat_types::QueueDescriptor;

pub use dir::DirQueue;
pub use error::QueueError;
pub use file::FileQueue;
pub use postgres::PgQueue;
pub use registry::QueueRegistry;

/// Marker bound for anything a queue can carry.
pub trait QueueItem: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> QueueItem for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// The queue contract shared by all backings.
#[async_trait]
pub trait JobQueue<T: QueueItem>: Send + Sync {
    /// Append an item. Returns `true` when the item was accepted, whether
    /// it went to storage or straight to a parked waiter.
    async fn enqueue(&self, item: T) -> Result<bool, QueueError>;

    /// Remove and return the oldest item, suspending while the queue is
    /// empty. A parked call fails with [`QueueError::Closed`] when the
    /// queue is closed.
    async fn dequeue(&self) -> Result<T, QueueError>;

    /// Non-destructive look at the oldest item. The Postgres backing
    /// always reports `None` (acknowledged capability gap).
    async fn peek(&self) -> Result<Option<T>, QueueError>;

    /// Drop all stored items. Parked waiters are unaffected.
    async fn clear(&self) -> Result<(), QueueError>;

    /// Close the queue, rejecting every parked waiter. Idempotent.
    async fn close(&self);
}

/// Construct a queue from its descriptor.
///
/// `queue_name` scopes items in shared backings (the Postgres table);
/// file and directory backings ignore it.
pub async fn open_queue<T: QueueItem>(
    descriptor: &QueueDescriptor,
    queue_name: &str,
) -> Result<Arc<dyn JobQueue<T>>, QueueError> {
    match descriptor {
        QueueDescriptor::File { location } => Ok(Arc::new(FileQueue::new(location))),
        QueueDescriptor::Dir {
            location,
            prefix,
            name,
            suffix,
        } => Ok(Arc::new(DirQueue::new(location, prefix, name, suffix))),
        QueueDescriptor::External { connection } => {
            Ok(Arc::new(PgQueue::connect(connection, queue_name).await?))
        }
    }
}
