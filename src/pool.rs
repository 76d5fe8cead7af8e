//! Buffer and notification-channel pools.
//!
//! Both pools are instance-scoped values injected through
//! [`ClientOptions`](crate::ClientOptions) rather than process-wide
//! singletons, so tests and embedders control sharing explicitly. A pool miss
//! allocates fresh and is never an error. Trimming is opportunistic: returns
//! occasionally drop entries that have sat idle too long, without a dedicated
//! timer task.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::message::FrameNotice;

/// Smallest pooled capacity class.
const MIN_CLASS: usize = 4 * 1024;
/// Buffers above this capacity are dropped instead of pooled.
const MAX_CLASS: usize = 16 * 1024 * 1024;
/// Idle entries retained per capacity class.
const PER_CLASS_LIMIT: usize = 32;
const TRIM_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TTL: Duration = Duration::from_secs(60);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Round a requested capacity up to its pool class.
fn size_class(min_capacity: usize) -> usize {
    min_capacity.max(MIN_CLASS).next_power_of_two()
}

/// Largest power of two not exceeding `capacity`. Buffers re-bucket by what
/// they can actually hold, which may exceed the class they were rented at.
fn class_of(capacity: usize) -> usize {
    debug_assert!(capacity > 0);
    1 << (usize::BITS - 1 - capacity.leading_zeros())
}

/// Per-client shared bundle of pools.
#[derive(Clone, Debug, Default)]
pub struct Pools {
    /// Byte buffers backing in-flight messages and header peeks.
    pub buffers: BufferPool,
    /// Frame-arrival notification channels.
    pub channels: ChannelPool<FrameNotice>,
}

struct IdleBuffer {
    buf: Vec<u8>,
    since: Instant,
}

struct BufferBuckets {
    by_class: HashMap<usize, Vec<IdleBuffer>>,
    last_trim: Instant,
}

/// Thread-safe pool of byte buffers bucketed by power-of-two capacity.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    buckets: Mutex<BufferBuckets>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                buckets: Mutex::new(BufferBuckets {
                    by_class: HashMap::new(),
                    last_trim: Instant::now(),
                }),
            }),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl BufferPool {
    /// Rent an empty buffer with at least `min_capacity` bytes of capacity.
    ///
    /// Requests beyond the largest pooled class get a fresh allocation that
    /// will not return to the pool.
    #[must_use]
    pub fn rent(&self, min_capacity: usize) -> PooledBuf {
        let class = size_class(min_capacity);
        let recycled = if class <= MAX_CLASS {
            let mut buckets = lock(&self.inner.buckets);
            buckets
                .by_class
                .get_mut(&class)
                .and_then(Vec::pop)
                .map(|idle| idle.buf)
        } else {
            None
        };
        let buf = recycled.unwrap_or_else(|| {
            Vec::with_capacity(if class <= MAX_CLASS { class } else { min_capacity })
        });
        PooledBuf {
            buf,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Number of idle buffers across all classes.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        lock(&self.inner.buckets)
            .by_class
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl BufferPoolInner {
    fn give_back(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if !(MIN_CLASS..=MAX_CLASS).contains(&capacity) {
            return;
        }
        buf.clear();
        let now = Instant::now();
        let mut buckets = lock(&self.buckets);
        let bucket = buckets.by_class.entry(class_of(capacity)).or_default();
        if bucket.len() < PER_CLASS_LIMIT {
            bucket.push(IdleBuffer { buf, since: now });
        }
        if now.duration_since(buckets.last_trim) >= TRIM_INTERVAL {
            buckets.last_trim = now;
            for bucket in buckets.by_class.values_mut() {
                bucket.retain(|idle| now.duration_since(idle.since) < IDLE_TTL);
            }
        }
    }
}

/// A rented buffer; returns to its pool on drop.
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Weak<BufferPoolInner>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(std::mem::take(&mut self.buf));
        }
    }
}

struct IdleChannel<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
    since: Instant,
}

struct ChannelBuckets<T> {
    by_capacity: HashMap<usize, Vec<IdleChannel<T>>>,
    last_trim: Instant,
}

/// Pool of bounded mpsc channels keyed by capacity class.
///
/// Rented channels are drained of stale items before reuse; notices are pure
/// wakeups, so a straggler left by a previous renter is harmless either way.
pub struct ChannelPool<T> {
    inner: Arc<ChannelPoolInner<T>>,
}

struct ChannelPoolInner<T> {
    buckets: Mutex<ChannelBuckets<T>>,
}

impl<T> Clone for ChannelPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ChannelPool<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(ChannelPoolInner {
                buckets: Mutex::new(ChannelBuckets {
                    by_capacity: HashMap::new(),
                    last_trim: Instant::now(),
                }),
            }),
        }
    }
}

impl<T> std::fmt::Debug for ChannelPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl<T> ChannelPool<T> {
    /// Rent a channel with at least `min_capacity` slots.
    #[must_use]
    pub fn rent(&self, min_capacity: usize) -> PooledChannel<T> {
        let capacity = min_capacity.max(1).next_power_of_two();
        let recycled = {
            let mut buckets = lock(&self.inner.buckets);
            buckets
                .by_capacity
                .get_mut(&capacity)
                .and_then(Vec::pop)
        };
        let (tx, mut rx) = match recycled {
            Some(idle) => (idle.tx, idle.rx),
            None => mpsc::channel(capacity),
        };
        while rx.try_recv().is_ok() {}
        PooledChannel {
            tx,
            rx: Some(rx),
            capacity,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Number of idle channels across all classes.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        lock(&self.inner.buckets)
            .by_capacity
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl<T> ChannelPoolInner<T> {
    fn give_back(&self, tx: mpsc::Sender<T>, rx: mpsc::Receiver<T>, capacity: usize) {
        let now = Instant::now();
        let mut buckets = lock(&self.buckets);
        let bucket = buckets.by_capacity.entry(capacity).or_default();
        if bucket.len() < PER_CLASS_LIMIT {
            bucket.push(IdleChannel { tx, rx, since: now });
        }
        if now.duration_since(buckets.last_trim) >= TRIM_INTERVAL {
            buckets.last_trim = now;
            for bucket in buckets.by_capacity.values_mut() {
                bucket.retain(|idle| now.duration_since(idle.since) < IDLE_TTL);
            }
        }
    }
}

/// A rented channel pair; returns to its pool on drop.
///
/// The pooled value keeps its own sender half alive so the channel can be
/// recycled, which means `recv` never observes closure; consumers must use
/// out-of-band completion flags rather than waiting for `None`.
pub struct PooledChannel<T> {
    tx: mpsc::Sender<T>,
    rx: Option<mpsc::Receiver<T>>,
    capacity: usize,
    pool: Weak<ChannelPoolInner<T>>,
}

impl<T> PooledChannel<T> {
    /// A sender handle for the producing side.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Receive the next item.
    pub async fn recv(&mut self) -> Option<T> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl<T> Drop for PooledChannel<T> {
    fn drop(&mut self) {
        if let (Some(rx), Some(pool)) = (self.rx.take(), self.pool.upgrade()) {
            pool.give_back(self.tx.clone(), rx, self.capacity);
        }
    }
}
