//! Pool of reusable PCM buffers.
//!
//! A [`Buffer`] is always in exactly one place: the pool's free list, the
//! producer filling it, or the device playing it. Ownership moves between
//! those places, so a buffer can never be submitted twice or reverted twice.
//! [`BufferPool::revert`] is the single hand-off point between the
//! completion path and the producer and may be called from any thread.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use pcmout_common::PcmFormat;
use serde::Serialize;
use tracing::{trace, warn};

use crate::error::{DeviceError, DeviceResult};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// One fixed-capacity block of raw PCM bytes.
pub struct Buffer {
    id: usize,
    pool_id: u64,
    data: Box<[u8]>,
    len: usize,
    in_flight: bool,
}

impl Buffer {
    /// Index of this buffer inside its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole backing storage, for filling in place before `set_len`.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set the number of valid bytes after filling through `as_mut_slice`.
    pub fn set_len(&mut self, len: usize) -> DeviceResult<()> {
        if len > self.capacity() {
            return Err(DeviceError::Overflow {
                len,
                capacity: self.capacity(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// Copy as much of `bytes` as fits and return the number copied.
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.capacity());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
        n
    }

    /// Raw pointer to the storage; stable for the lifetime of the buffer.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// Counters describing pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total buffers owned by the pool
    pub buffers: usize,
    /// Capacity of each buffer in bytes
    pub buffer_capacity: usize,
    /// Buffers currently on the free list
    pub free: usize,
    /// Buffers currently submitted to a device
    pub in_flight: usize,
    /// Buffers ever submitted to a device
    pub submitted: u64,
    /// Submitted buffers returned after playback
    pub completed: u64,
    /// All returns to the free list, including rejected submissions
    pub reverted: u64,
}

struct PoolShared {
    id: u64,
    buffer_count: usize,
    buffer_capacity: usize,
    free: Mutex<VecDeque<Buffer>>,
    available: Condvar,
    in_flight: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    reverted: AtomicU64,
}

/// Shared handle to a fixed set of buffers. Cloning shares the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create `count` buffers of `capacity` bytes each.
    pub fn new(count: usize, capacity: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let free = (0..count)
            .map(|index| Buffer {
                id: index,
                pool_id: id,
                data: vec![0u8; capacity].into_boxed_slice(),
                len: 0,
                in_flight: false,
            })
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                id,
                buffer_count: count,
                buffer_capacity: capacity,
                free: Mutex::new(free),
                available: Condvar::new(),
                in_flight: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                reverted: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool whose buffers each hold `buffer_ms` of audio in
    /// `format`, rounded down to whole frames (at least one frame).
    pub fn for_format(format: &PcmFormat, count: usize, buffer_ms: u32) -> Self {
        let frames = (format.sample_rate as u64 * buffer_ms as u64 / 1000).max(1) as usize;
        Self::new(count, format.frames_to_bytes(frames))
    }

    fn free_list(&self) -> MutexGuard<'_, VecDeque<Buffer>> {
        self.shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn buffer_count(&self) -> usize {
        self.shared.buffer_count
    }

    pub fn buffer_capacity(&self) -> usize {
        self.shared.buffer_capacity
    }

    /// Take a free buffer, blocking until one is reverted.
    pub fn acquire(&self) -> Buffer {
        let mut free = self.free_list();
        loop {
            if let Some(buffer) = free.pop_front() {
                return buffer;
            }
            free = self
                .shared
                .available
                .wait(free)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take a free buffer if one is available right now.
    pub fn try_acquire(&self) -> Option<Buffer> {
        self.free_list().pop_front()
    }

    /// Take a free buffer, giving up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Buffer> {
        let deadline = Instant::now() + timeout;
        let mut free = self.free_list();
        loop {
            if let Some(buffer) = free.pop_front() {
                return Some(buffer);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            free = self
                .shared
                .available
                .wait_timeout(free, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Return a buffer to the free list and wake one waiting producer.
    ///
    /// The free-list lock is released before waiters are woken.
    pub fn revert(&self, mut buffer: Buffer) {
        if buffer.pool_id != self.shared.id {
            warn!(
                "[Pool] Dropping buffer {} reverted to a pool that does not own it",
                buffer.id
            );
            return;
        }

        let was_in_flight = std::mem::replace(&mut buffer.in_flight, false);
        let id = buffer.id;
        buffer.len = 0;

        self.free_list().push_back(buffer);

        if was_in_flight {
            self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.shared.completed.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.reverted.fetch_add(1, Ordering::SeqCst);
        self.shared.available.notify_one();

        trace!("[Pool] Buffer {} reverted (was in flight: {})", id, was_in_flight);
    }

    /// True when no buffer is currently in flight.
    pub fn data_finished(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst) == 0
    }

    /// Whether `buffer` was handed out by this pool.
    pub fn owns(&self, buffer: &Buffer) -> bool {
        buffer.pool_id == self.shared.id
    }

    /// Record that `buffer` is being handed to hardware.
    pub(crate) fn begin_flight(&self, buffer: &mut Buffer) {
        if !buffer.in_flight {
            buffer.in_flight = true;
            self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
            self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn free_count(&self) -> usize {
        self.free_list().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            buffers: self.shared.buffer_count,
            buffer_capacity: self.shared.buffer_capacity,
            free: self.free_count(),
            in_flight: self.in_flight(),
            submitted: self.shared.submitted.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            reverted: self.shared.reverted.load(Ordering::SeqCst),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.shared.id)
            .field("stats", &self.stats())
            .finish()
    }
}
