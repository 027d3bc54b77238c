// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Reference-counted payload pool.
//!
//! This module provides a lock-free payload pool using
//! crossbeam::queue::ArrayQueue that recycles backing buffers across
//! samples. Payloads handed to the recorder are cheap to clone and share:
//! the bytes stay live until the last reference drops, at which point the
//! backing buffer returns to the pool.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default buffer capacity (64KB, typical upper bound for a DDS sample)
const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Maximum number of buffers kept in the pool
const MAX_POOL_SIZE: usize = 16;

/// Pooled backing storage for a payload.
///
/// Returns its buffer to the pool when dropped. Shared behind an `Arc`
/// by every [`Payload`] clone referencing it.
struct PooledBytes {
    data: Vec<u8>,
    pool: Arc<PayloadPoolInner>,
}

impl Drop for PooledBytes {
    #[inline]
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.return_buffer(data);
    }
}

/// A reference-counted byte payload.
///
/// Cloning a `Payload` is cheap and never copies the bytes. The backing
/// buffer is recycled through its [`PayloadPool`] once the last clone is
/// dropped, so holders (buffered messages, pending queues) keep the bytes
/// live for exactly as long as they are needed.
#[derive(Clone)]
pub struct Payload {
    bytes: Arc<PooledBytes>,
}

impl Payload {
    /// Get the payload bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes.data
    }

    /// Get the payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.data.len()
    }

    /// Check if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.data.is_empty()
    }

    /// Number of live references to this payload, including this one.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }
}

impl AsRef<[u8]> for Payload {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.bytes.data
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.bytes.data.len())
            .field("refs", &Arc::strong_count(&self.bytes))
            .finish()
    }
}

/// Inner pool state (shared via Arc).
struct PayloadPoolInner {
    /// Lock-free queue of recycled buffers
    queue: ArrayQueue<Vec<u8>>,
    /// Default buffer capacity for new allocations
    default_capacity: usize,
    /// Total number of buffer allocations (for metrics)
    total_allocations: AtomicUsize,
    /// Current pool size (for metrics)
    pool_size: AtomicUsize,
}

impl PayloadPoolInner {
    /// Return a buffer to the pool.
    #[inline]
    fn return_buffer(&self, mut buffer: Vec<u8>) {
        buffer.clear();

        // If the pool is full the buffer is simply dropped.
        if self.queue.push(buffer).is_ok() {
            self.pool_size.fetch_add(1, Ordering::Release);
        }
    }

    /// Take a buffer from the pool, or allocate a new one.
    #[inline]
    fn take_buffer(&self, min_capacity: usize) -> Vec<u8> {
        if let Some(mut buf) = self.queue.pop() {
            self.pool_size.fetch_sub(1, Ordering::Acquire);

            if buf.capacity() < min_capacity {
                buf.reserve(min_capacity - buf.capacity());
            }
            return buf;
        }

        self.total_allocations.fetch_add(1, Ordering::Release);
        Vec::with_capacity(min_capacity.max(self.default_capacity))
    }
}

impl std::fmt::Debug for PayloadPoolInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadPoolInner")
            .field("pool_size", &self.pool_size.load(Ordering::Acquire))
            .field(
                "total_allocations",
                &self.total_allocations.load(Ordering::Acquire),
            )
            .finish()
    }
}

/// Lock-free pool of recycled payload buffers.
///
/// The upstream pipe wraps each received sample through [`PayloadPool::wrap`];
/// the recorder holds a strong reference to the pool so buffers outlive
/// any payload still in flight.
///
/// # Example
///
/// ```
/// use roborec::types::payload::PayloadPool;
///
/// let pool = PayloadPool::new();
/// let payload = pool.wrap(&[1, 2, 3]);
/// let copy = payload.clone();
/// assert_eq!(copy.as_bytes(), &[1, 2, 3]);
/// ```
#[derive(Clone, Debug)]
pub struct PayloadPool {
    inner: Arc<PayloadPoolInner>,
}

impl PayloadPool {
    /// Create a pool with the specified default buffer capacity.
    pub fn with_capacity(default_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PayloadPoolInner {
                queue: ArrayQueue::new(MAX_POOL_SIZE),
                default_capacity,
                total_allocations: AtomicUsize::new(0),
                pool_size: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a pool with the default 64KB buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Copy `data` into a pooled buffer and return a shareable payload.
    pub fn wrap(&self, data: &[u8]) -> Payload {
        let mut buf = self.inner.take_buffer(data.len());
        buf.extend_from_slice(data);
        Payload {
            bytes: Arc::new(PooledBytes {
                data: buf,
                pool: Arc::clone(&self.inner),
            }),
        }
    }

    /// Pre-warm the pool with buffers.
    pub fn warmup(&self, count: usize) {
        for _ in 0..count.min(MAX_POOL_SIZE) {
            let buffer = Vec::with_capacity(self.inner.default_capacity);
            if self.inner.queue.push(buffer).is_ok() {
                self.inner.pool_size.fetch_add(1, Ordering::Release);
            }
        }
    }

    /// Get the current number of recycled buffers in the pool.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size.load(Ordering::Acquire)
    }

    /// Get the total number of buffer allocations (excluding pool reuses).
    #[inline]
    pub fn total_allocations(&self) -> usize {
        self.inner.total_allocations.load(Ordering::Acquire)
    }
}

impl Default for PayloadPool {
    fn default() -> Self {
        Self::new()
    }
}
