//! Parked-waiter bookkeeping shared by the queue backings.

use std::collections::VecDeque;

use tokio::sync::oneshot;

/// In-memory list of callers parked on an empty queue.
///
/// Waiters are resolved oldest-first. Dropping a waiter's sender wakes the
/// parked receiver with a channel error, which the backings map to
/// `QueueError::Closed`.
pub(crate) struct WaiterState<T> {
    waiters: VecDeque<oneshot::Sender<T>>,
    pub(crate) closed: bool,
}

impl<T> WaiterState<T> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
            closed: false,
        }
    }

    /// Park a new waiter and hand back its completion handle.
    pub(crate) fn park(&mut self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    /// Offer an item to the oldest live waiter.
    ///
    /// Returns `None` when a waiter consumed the item; returns the item
    /// back when no live waiter remains (the caller persists it instead).
    pub(crate) fn offer(&mut self, mut item: T) -> Option<T> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return None,
                // Receiver already gave up; try the next waiter.
                Err(returned) => item = returned,
            }
        }
        Some(item)
    }

    pub(crate) fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    /// Mark closed and reject every parked waiter.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_resolves_oldest_first() {
        let mut state: WaiterState<u32> = WaiterState::new();
        let first = state.park();
        let second = state.park();

        assert!(state.offer(1).is_none());
        assert!(state.offer(2).is_none());
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_offer_skips_dead_waiters() {
        let mut state: WaiterState<u32> = WaiterState::new();
        let dead = state.park();
        drop(dead);
        let live = state.park();

        assert!(state.offer(7).is_none());
        assert_eq!(live.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_offer_returns_item_without_waiters() {
        let mut state: WaiterState<u32> = WaiterState::new();
        assert_eq!(state.offer(9), Some(9));
    }

    #[tokio::test]
    async fn test_close_rejects_parked_waiters() {
        let mut state: WaiterState<u32> = WaiterState::new();
        let rx = state.park();
        state.close();
        assert!(rx.await.is_err());
        assert!(state.closed);
    }
}
