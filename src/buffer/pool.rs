//! Fixed pool of raw video-frame storage
//!
//! Decoded video frames are large; allocating one per frame would churn the
//! allocator and unbound memory. The pool hands out a fixed set of blocks
//! sized to the media's decoded-frame capacity and takes them back when the
//! owning [`PoolBlock`] is dropped, so total video memory is bounded by
//! `capacity * block_size` for the lifetime of a pipeline.

use crate::utils::error::{PlayheadError, Result};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Fixed-capacity pool of reusable storage blocks
pub struct FramePool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    block_size: usize,
    capacity: usize,
    inner: Mutex<PoolInner>,
    freed: Notify,
}

struct PoolInner {
    free: Vec<BytesMut>,
    outstanding: usize,
    closed: bool,
}

/// A storage block checked out of a [`FramePool`]
///
/// Dropping the block returns its storage to the pool, so a block travelling
/// inside a video frame comes home whether the frame is presented, cleared
/// out of a buffer, or dropped on a cancellation unwind.
pub struct PoolBlock {
    data: Option<BytesMut>,
    pool: Weak<PoolShared>,
}

impl FramePool {
    /// Create a pool of `capacity` blocks of `block_size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `block_size` is zero.
    pub fn new(capacity: usize, block_size: usize) -> Self {
        assert!(capacity >= 1, "frame pool capacity must be at least 1");
        assert!(block_size >= 1, "frame pool block size must be at least 1");

        let free = (0..capacity).map(|_| BytesMut::zeroed(block_size)).collect();
        Self {
            shared: Arc::new(PoolShared {
                block_size,
                capacity,
                inner: Mutex::new(PoolInner {
                    free,
                    outstanding: 0,
                    closed: false,
                }),
                freed: Notify::new(),
            }),
        }
    }

    /// Check out a block, suspending while none is free.
    pub async fn acquire(&self) -> Result<PoolBlock> {
        loop {
            let notified = self.shared.freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.shared.inner.lock();
                if inner.closed {
                    return Err(PlayheadError::PoolClosed);
                }
                if let Some(data) = inner.free.pop() {
                    inner.outstanding += 1;
                    return Ok(PoolBlock {
                        data: Some(data),
                        pool: Arc::downgrade(&self.shared),
                    });
                }
            }

            notified.await;
        }
    }

    /// Return a block to the pool.
    ///
    /// Equivalent to dropping the block, but verifies the block was acquired
    /// from this pool; handing back a foreign block is a contract violation.
    pub fn release(&self, block: PoolBlock) -> Result<()> {
        let owned = block
            .pool
            .upgrade()
            .is_some_and(|shared| Arc::ptr_eq(&shared, &self.shared));
        // Dropping still sends the block home to the pool it came from.
        drop(block);
        if owned {
            Ok(())
        } else {
            Err(PlayheadError::Pool(
                "released a block that was never acquired from this pool".to_string(),
            ))
        }
    }

    /// Verify every block is back on the free list.
    ///
    /// Callers stop the buffer loop and clear the buffers first; by then all
    /// blocks have come home through [`PoolBlock`] drops, and a non-zero
    /// outstanding count means a leak.
    pub fn reset(&self) -> Result<()> {
        let inner = self.shared.inner.lock();
        if inner.closed {
            return Err(PlayheadError::PoolClosed);
        }
        if inner.outstanding != 0 {
            return Err(PlayheadError::Pool(format!(
                "{} blocks still outstanding at reset",
                inner.outstanding
            )));
        }
        Ok(())
    }

    /// Free all storage and fail subsequent operations. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.free.clear();
        }
        self.shared.freed.notify_waiters();
    }

    /// Number of blocks currently on the free list.
    pub fn free_blocks(&self) -> usize {
        self.shared.inner.lock().free.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }
}

impl PoolShared {
    fn restore(&self, mut data: BytesMut) {
        let mut inner = self.inner.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        if inner.closed {
            return;
        }
        data.clear();
        data.resize(self.block_size, 0);
        inner.free.push(data);
        drop(inner);
        self.freed.notify_one();
    }
}

impl PoolBlock {
    /// Read access to the block's storage.
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Write access to the block's storage, for decoders filling it.
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        self.data
            .as_mut()
            .expect("pool block accessed after release")
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |data| data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PoolBlock {
    fn drop(&mut self) {
        if let (Some(data), Some(pool)) = (self.data.take(), self.pool.upgrade()) {
            pool.restore(data);
        }
    }
}

impl std::fmt::Debug for PoolBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBlock").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_acquire_and_drop_returns_block() {
        let pool = FramePool::new(2, 64);
        assert_eq!(pool.free_blocks(), 2);

        let block = pool.acquire().await.unwrap();
        assert_eq!(block.len(), 64);
        assert_eq!(pool.free_blocks(), 1);

        drop(block);
        assert_eq!(pool.free_blocks(), 2);
        pool.reset().unwrap();
    }

    #[tokio::test]
    async fn test_acquire_suspends_until_release() {
        let pool = StdArc::new(FramePool::new(1, 16));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = StdArc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let block = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("acquire must unblock after release")
            .unwrap()
            .unwrap();
        assert_eq!(block.len(), 16);
    }

    #[tokio::test]
    async fn test_reset_reports_outstanding_blocks() {
        let pool = FramePool::new(2, 16);
        let block = pool.acquire().await.unwrap();

        assert!(matches!(pool.reset(), Err(PlayheadError::Pool(_))));
        drop(block);
        pool.reset().unwrap();
    }

    #[tokio::test]
    async fn test_release_rejects_foreign_block() {
        let pool_a = FramePool::new(1, 16);
        let pool_b = FramePool::new(1, 16);

        let block = pool_a.acquire().await.unwrap();
        assert!(matches!(
            pool_b.release(block),
            Err(PlayheadError::Pool(_))
        ));

        // The block still went home to its own pool; pool_b gained nothing.
        assert_eq!(pool_a.free_blocks(), 1);
        assert_eq!(pool_b.free_blocks(), 1);
        pool_a.reset().unwrap();
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_and_fails_acquire() {
        let pool = StdArc::new(FramePool::new(1, 16));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = StdArc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.close();
        let result = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("acquire must unblock after close")
            .unwrap();
        assert!(matches!(result, Err(PlayheadError::PoolClosed)));

        // Returning a block after close discards it quietly.
        drop(held);
        assert_eq!(pool.free_blocks(), 0);
    }

    #[tokio::test]
    async fn test_block_reuse_is_cleared() {
        let pool = FramePool::new(1, 8);

        let mut block = pool.acquire().await.unwrap();
        block.bytes_mut().fill(0xAB);
        drop(block);

        let block = pool.acquire().await.unwrap();
        assert_eq!(block.len(), 8);
        assert!(block.bytes().iter().all(|&b| b == 0));
    }
}
