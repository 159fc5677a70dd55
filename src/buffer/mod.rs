//! Frame buffering for Playhead
//!
//! Provides the bounded FIFO that decouples decoding from presentation and
//! the fixed pool of raw storage blocks that backs decoded video frames.

mod pool;

pub use pool::{FramePool, PoolBlock};

use crate::utils::error::{PlayheadError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Bounded FIFO with suspending put/take
///
/// Producers suspend while the buffer is full and consumers suspend while it
/// is empty. `clear` discards contents without closing; `close` wakes every
/// suspended caller with [`PlayheadError::BufferClosed`] and is idempotent.
///
/// The engine runs one producer and one consumer per buffer, but the
/// implementation stays correct under arbitrary contention: waiters re-check
/// the queue state after every wakeup, and the notify futures are enabled
/// before the state check so a concurrent `clear`/`close` broadcast cannot
/// be missed.
pub struct FrameBuffer<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_full: Notify,
    not_empty: Notify,
}

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

impl<T> FrameBuffer<T> {
    /// Create a buffer holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "frame buffer capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    /// Insert at the tail, suspending while the buffer is full.
    pub async fn put(&self, item: T) -> Result<()> {
        let mut item = Some(item);
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(PlayheadError::BufferClosed);
                }
                if inner.queue.len() < self.capacity {
                    if let Some(item) = item.take() {
                        inner.queue.push_back(item);
                    }
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Remove the head, suspending while the buffer is empty.
    pub async fn take(&self) -> Result<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(PlayheadError::BufferClosed);
                }
                if let Some(item) = inner.queue.pop_front() {
                    self.not_full.notify_one();
                    return Ok(item);
                }
            }

            notified.await;
        }
    }

    /// Discard all buffered elements without closing.
    pub fn clear(&self) {
        let drained: Vec<T> = {
            let mut inner = self.inner.lock();
            inner.queue.drain(..).collect()
        };
        // Dropped outside the lock: video frames return pooled storage here.
        drop(drained);
        self.not_full.notify_waiters();
    }

    /// Close the buffer, waking every suspended caller. Idempotent.
    pub fn close(&self) {
        let drained: Vec<T> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.queue.drain(..).collect()
        };
        drop(drained);
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fifo_order() {
        let buffer = FrameBuffer::new(4);

        buffer.put(1u32).await.unwrap();
        buffer.put(2).await.unwrap();
        buffer.put(3).await.unwrap();

        assert_eq!(buffer.take().await.unwrap(), 1);
        assert_eq!(buffer.take().await.unwrap(), 2);
        assert_eq!(buffer.take().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_put_suspends_until_take() {
        let buffer = Arc::new(FrameBuffer::new(1));
        buffer.put(1u32).await.unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.put(2).await })
        };

        // The producer cannot finish while the buffer is full.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(buffer.take().await.unwrap(), 1);
        producer.await.unwrap().unwrap();
        assert_eq!(buffer.take().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_clear_unblocks_full_producer() {
        let buffer = Arc::new(FrameBuffer::new(1));
        buffer.put(1u32).await.unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.put(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        buffer.clear();
        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer must unblock after clear")
            .unwrap()
            .unwrap();

        assert_eq!(buffer.take().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let buffer: Arc<FrameBuffer<u32>> = Arc::new(FrameBuffer::new(1));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.take().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        buffer.close();
        let result = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer must unblock after close")
            .unwrap();
        assert!(matches!(result, Err(PlayheadError::BufferClosed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let buffer: FrameBuffer<u32> = FrameBuffer::new(2);
        buffer.close();
        buffer.close();
        assert!(buffer.is_closed());
        assert!(matches!(
            buffer.put(1).await,
            Err(PlayheadError::BufferClosed)
        ));
    }

    #[tokio::test]
    async fn test_contended_producers_and_consumers() {
        let buffer = Arc::new(FrameBuffer::new(2));
        let mut tasks = Vec::new();

        for i in 0..4u32 {
            let buffer = Arc::clone(&buffer);
            tasks.push(tokio::spawn(async move {
                for j in 0..25 {
                    buffer.put(i * 100 + j).await.unwrap();
                }
            }));
        }

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut seen = 0;
                while seen < 100 {
                    buffer.take().await.unwrap();
                    seen += 1;
                }
                seen
            })
        };

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(consumer.await.unwrap(), 100);
        assert!(buffer.is_empty());
    }
}
