/*!
 * Bounded pool of reusable part buffers
 *
 * Every part body a transfer holds in memory lives in a buffer checked out
 * from a pool, so the pool capacity bounds in-flight memory. A pool can be
 * shared by concurrent transfers through [`Options`](crate::client::Options).
 */

use crate::error::{Result, TransferError};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Fixed-size pool of byte buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    semaphore: Semaphore,
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    buffer_size: usize,
    checked_out: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers (at least one), each pre-sized
    /// for `buffer_size` bytes on first use
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Semaphore::new(capacity),
                free: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                buffer_size,
                checked_out: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out a buffer, waiting until one is free
    ///
    /// # Errors
    ///
    /// `Aborted` if `cancel` fires first, `BufferPoolClosed` once the pool
    /// has been closed.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<PooledBuffer> {
        if self.is_closed() {
            return Err(TransferError::BufferPoolClosed);
        }

        self.reserve(1, cancel).await?;
        Ok(self.checkout())
    }

    /// Check out `count` buffers in one step
    ///
    /// Either all of them are handed out or none is, so transfers that each
    /// need several buffers up front cannot starve one another holding a
    /// share of the pool.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus `Config` when `count` exceeds the capacity.
    pub async fn get_many(&self, count: usize, cancel: &CancellationToken) -> Result<Vec<PooledBuffer>> {
        if count > self.inner.capacity {
            return Err(TransferError::Config(format!(
                "cannot check out {} buffers from a pool of {}",
                count, self.inner.capacity
            )));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        if self.is_closed() {
            return Err(TransferError::BufferPoolClosed);
        }
        self.reserve(count, cancel).await?;
        Ok((0..count).map(|_| self.checkout()).collect())
    }

    /// Take `count` permits; each checked-out buffer gives one back on drop
    async fn reserve(&self, count: usize, cancel: &CancellationToken) -> Result<()> {
        let permits = u32::try_from(count)
            .map_err(|_| TransferError::Config(format!("{} buffers is too many", count)))?;
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Aborted),
            permit = self.inner.semaphore.acquire_many(permits) => {
                permit.map_err(|_| TransferError::BufferPoolClosed)?
            }
        };
        permit.forget();
        Ok(())
    }

    fn checkout(&self) -> PooledBuffer {
        let recycled = self
            .inner
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let buf = recycled.unwrap_or_else(|| Vec::with_capacity(self.inner.buffer_size));
        self.inner.checked_out.fetch_add(1, Ordering::AcqRel);

        PooledBuffer {
            buf,
            pool: Some(self.inner.clone()),
        }
    }

    /// Return a buffer explicitly; dropping it has the same effect
    pub fn put(&self, buffer: PooledBuffer) {
        drop(buffer);
    }

    /// Refuse further checkouts; returns are still accepted
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn checked_out(&self) -> usize {
        self.inner.checked_out.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.inner.capacity.saturating_sub(self.checked_out())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("checked_out", &self.checked_out())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`]
///
/// Returned to its pool, and one waiter woken, when dropped.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuffer {
    /// Wrap bytes that were not taken from any pool
    pub fn detached(buf: Vec<u8>) -> Self {
        Self { buf, pool: None }
    }

    /// Move the contents out, leaving the buffer empty but still checked out
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut buf = std::mem::take(&mut self.buf);
            buf.clear();
            if buf.capacity() > 0 {
                let mut free = pool
                    .free
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if free.len() < pool.capacity {
                    free.push(buf);
                }
            }
            pool.checked_out.fetch_sub(1, Ordering::AcqRel);
            pool.semaphore.add_permits(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_get_blocks_until_put() {
        let pool = BufferPool::new(2, 1024);
        let cancel = CancellationToken::new();

        let a = pool.get(&cancel).await.unwrap();
        let _b = pool.get(&cancel).await.unwrap();
        assert_eq!(pool.checked_out(), 2);
        assert_eq!(pool.available(), 0);

        let blocked = timeout(Duration::from_millis(50), pool.get(&cancel)).await;
        assert!(blocked.is_err(), "third checkout should wait");

        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.get(&cancel).await.map(|b| b.capacity()) })
        };
        pool.put(a);

        let capacity = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap()
            .unwrap();
        assert!(capacity >= 1024, "recycled buffer keeps its allocation");
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiter() {
        let pool = BufferPool::new(1, 16);
        let cancel = CancellationToken::new();
        let _held = pool.get(&cancel).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.get(&cancel).await })
        };
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TransferError::Aborted)));
    }

    #[tokio::test]
    async fn test_close_fails_fast_but_accepts_returns() {
        let pool = BufferPool::new(2, 16);
        let cancel = CancellationToken::new();
        let held = pool.get(&cancel).await.unwrap();

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(
            pool.get(&cancel).await,
            Err(TransferError::BufferPoolClosed)
        ));

        pool.put(held);
        assert_eq!(pool.checked_out(), 0);
    }

    #[tokio::test]
    async fn test_get_many_is_all_or_nothing() {
        let pool = BufferPool::new(3, 16);
        let cancel = CancellationToken::new();
        let held = pool.get(&cancel).await.unwrap();

        // only two free; a request for three waits without taking any
        let blocked = timeout(Duration::from_millis(50), pool.get_many(3, &cancel)).await;
        assert!(blocked.is_err());
        assert_eq!(pool.available(), 2);

        drop(held);
        let all = timeout(Duration::from_secs(1), pool.get_many(3, &cancel))
            .await
            .expect("all three buffers are free")
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(pool.available(), 0);

        drop(all);
        assert_eq!(pool.available(), 3);
        assert!(pool.get_many(0, &cancel).await.unwrap().is_empty());
        assert!(matches!(
            pool.get_many(4, &cancel).await,
            Err(TransferError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_returned_buffers_are_reused() {
        let pool = BufferPool::new(1, 0);
        let cancel = CancellationToken::new();
        let mut buf = pool.get(&cancel).await.unwrap();
        buf.extend_from_slice(&[7u8; 4096]);
        drop(buf);

        let again = pool.get(&cancel).await.unwrap();
        assert!(again.is_empty());
        assert!(again.capacity() >= 4096);
    }

    #[tokio::test]
    async fn test_detached_buffer_does_not_touch_pool() {
        let pool = BufferPool::new(1, 16);
        let detached = PooledBuffer::detached(vec![1, 2, 3]);
        assert_eq!(detached.len(), 3);
        drop(detached);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_take_keeps_slot_until_drop() {
        let pool = BufferPool::new(1, 16);
        let cancel = CancellationToken::new();
        let mut buf = pool.get(&cancel).await.unwrap();
        buf.extend_from_slice(b"part body");

        let body = buf.take();
        assert_eq!(body, b"part body");
        assert!(buf.is_empty());
        assert_eq!(pool.available(), 0);

        drop(buf);
        assert_eq!(pool.available(), 1);
    }
}
