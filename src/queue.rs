//! Bounded FIFO work queue between the producer and the batch writer.
//!
//! The queue is a thin wrapper over a bounded [`tokio::sync::mpsc`] channel
//! that gives both sides timed operations:
//!
//! - [`QueueSender::put`] waits up to a timeout for a free slot and hands the
//!   item back on expiry, so a full queue never drops work.
//! - [`QueueReceiver::get`] waits up to a timeout for an item.
//!
//! A full queue is how backpressure reaches the producer: it keeps retrying
//! `put` until the writer drains a slot.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TryRecvError};

/// Default number of items the queue can hold.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Why a `put` did not place the item. Both variants return the item.
#[derive(Debug, Error)]
pub enum PutError<T> {
    #[error("queue is full")]
    Full(T),
    #[error("queue receiver has been dropped")]
    Closed(T),
}

impl<T> PutError<T> {
    /// Take back the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(item) | PutError::Closed(item) => item,
        }
    }
}

/// Why a `get` did not return an item.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GetError {
    #[error("queue is empty")]
    Empty,
    #[error("queue is empty and every sender has been dropped")]
    Closed,
}

/// Create a queue holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero; callers validate configuration first.
pub fn work_queue<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer half of the queue.
#[derive(Debug, Clone)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> QueueSender<T> {
    /// Enqueue `item`, waiting up to `timeout` for space.
    pub async fn put(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        self.tx.send_timeout(item, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(item) => PutError::Full(item),
            SendTimeoutError::Closed(item) => PutError::Closed(item),
        })
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer half of the queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue the oldest item, waiting up to `timeout` for one to arrive.
    pub async fn get(&mut self, timeout: Duration) -> Result<T, GetError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => Ok(item),
            Ok(None) => Err(GetError::Closed),
            Err(_) => Err(GetError::Empty),
        }
    }

    /// Dequeue without waiting. Used to drain the queue at shutdown.
    pub fn try_get(&mut self) -> Result<T, GetError> {
        self.rx.try_recv().map_err(|e| match e {
            TryRecvError::Empty => GetError::Empty,
            TryRecvError::Disconnected => GetError::Closed,
        })
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Refuse further `put`s while keeping queued items readable.
    ///
    /// A `put` already holding a slot still lands; once the queue is empty
    /// after that, `get` reports [`GetError::Closed`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = work_queue(4);
        for i in 0..3 {
            tx.put(i, SHORT).await.unwrap();
        }
        assert_eq!(rx.get(SHORT).await, Ok(0));
        assert_eq!(rx.get(SHORT).await, Ok(1));
        assert_eq!(rx.get(SHORT).await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_hands_item_back() {
        let (tx, mut rx) = work_queue(1);
        tx.put("first", SHORT).await.unwrap();

        let err = tx.put("second", SHORT).await.unwrap_err();
        assert!(matches!(err, PutError::Full(_)));
        let second = err.into_inner();
        assert_eq!(second, "second");
        assert_eq!(tx.len(), 1);

        // Once a slot frees up the returned item goes in and comes out intact.
        assert_eq!(rx.get(SHORT).await, Ok("first"));
        tx.put(second, SHORT).await.unwrap();
        assert_eq!(rx.get(SHORT).await, Ok("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_put_completes_when_slot_frees() {
        let (tx, mut rx) = work_queue(1);
        tx.put(1, SHORT).await.unwrap();

        let waiter = tokio::spawn(async move { tx.put(2, Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.get(SHORT).await, Ok(1));

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(rx.get(SHORT).await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_times_out_when_empty() {
        let (_tx, mut rx) = work_queue::<u32>(2);
        assert_eq!(rx.get(Duration::from_secs(3)).await, Err(GetError::Empty));
        assert_eq!(rx.try_get(), Err(GetError::Empty));
    }

    #[tokio::test]
    async fn test_closed_sides() {
        let (tx, mut rx) = work_queue(2);
        tx.put(1, SHORT).await.unwrap();
        drop(tx);
        // Items already queued are still delivered before Closed.
        assert_eq!(rx.try_get(), Ok(1));
        assert_eq!(rx.get(SHORT).await, Err(GetError::Closed));

        let (tx, rx) = work_queue(2);
        drop(rx);
        let err = tx.put(9, SHORT).await.unwrap_err();
        assert!(matches!(err, PutError::Closed(9)));
    }

    #[tokio::test]
    async fn test_close_refuses_puts_but_keeps_queued_items() {
        let (tx, mut rx) = work_queue(4);
        tx.put(1, SHORT).await.unwrap();
        tx.put(2, SHORT).await.unwrap();

        rx.close();

        assert!(matches!(tx.put(3, SHORT).await, Err(PutError::Closed(3))));
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.get(SHORT).await, Ok(1));
        assert_eq!(rx.try_get(), Ok(2));
        // The sender is still alive, yet the closed queue reports Closed once empty.
        assert_eq!(rx.get(SHORT).await, Err(GetError::Closed));
    }
}
