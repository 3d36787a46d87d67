//! Background buffer preparation.
//!
//! A filler thread takes free buffers from the pool, fills them from a
//! [`PcmSource`] and hands them over in order. Because it can only take
//! buffers the device has reverted, the pool size bounds how far it runs
//! ahead of playback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::pool::{Buffer, BufferPool};
use crate::source::PcmSource;

/// How often a filler blocked on an empty pool rechecks the stop flag
const ACQUIRE_POLL: Duration = Duration::from_millis(50);

/// Outcome of [`Preparation::next_timeout`].
#[derive(Debug)]
pub enum Prepared {
    Ready(Buffer),
    /// Nothing ready yet
    Pending,
    /// No more buffers will come
    Done,
}

/// Handle to a running filler thread.
pub struct Preparation {
    prepared: Option<Receiver<Buffer>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<DeviceResult<u64>>>,
    pool: BufferPool,
}

impl Preparation {
    /// Start filling buffers from `source`.
    pub fn spawn(source: Box<dyn PcmSource>, pool: BufferPool) -> DeviceResult<Self> {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let filler_pool = pool.clone();
        let filler_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("pcm-prepare".to_string())
            .spawn(move || fill(source, filler_pool, tx, filler_stop))
            .map_err(|e| DeviceError::Source(format!("cannot start preparation thread: {}", e)))?;

        Ok(Self {
            prepared: Some(rx),
            stop,
            handle: Some(handle),
            pool,
        })
    }

    /// Next filled buffer, blocking until one is ready.
    ///
    /// `None` once the source is exhausted, failed, or preparation stopped.
    pub fn next(&self) -> Option<Buffer> {
        self.prepared.as_ref()?.recv().ok()
    }

    /// Like [`next`](Self::next), giving up after `timeout`.
    pub fn next_timeout(&self, timeout: Duration) -> Prepared {
        let Some(rx) = self.prepared.as_ref() else {
            return Prepared::Done;
        };
        match rx.recv_timeout(timeout) {
            Ok(buffer) => Prepared::Ready(buffer),
            Err(RecvTimeoutError::Timeout) => Prepared::Pending,
            Err(RecvTimeoutError::Disconnected) => Prepared::Done,
        }
    }

    /// Ask the filler to stop after its current buffer.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the filler and return the number of bytes it prepared.
    ///
    /// Buffers prepared but never taken go back to the pool.
    pub fn finish(mut self) -> DeviceResult<u64> {
        self.shutdown().unwrap_or(Ok(0))
    }

    fn shutdown(&mut self) -> Option<DeviceResult<u64>> {
        self.stop();

        // The channel is unbounded, so the filler never blocks on send and
        // exits within one acquire poll
        let result = self.handle.take().map(|handle| match handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!("[Prepare] Filler thread panicked");
                Err(DeviceError::Source("preparation thread panicked".to_string()))
            }
        });

        if let Some(rx) = self.prepared.take() {
            for buffer in rx.try_iter() {
                self.pool.revert(buffer);
            }
        }
        result
    }
}

impl Drop for Preparation {
    fn drop(&mut self) {
        if let Some(Err(e)) = self.shutdown() {
            warn!("[Prepare] Preparation ended with error: {}", e);
        }
    }
}

fn fill(
    mut source: Box<dyn PcmSource>,
    pool: BufferPool,
    prepared: Sender<Buffer>,
    stop: Arc<AtomicBool>,
) -> DeviceResult<u64> {
    let mut total = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let Some(mut buffer) = pool.acquire_timeout(ACQUIRE_POLL) else {
            continue;
        };

        let filled = match source.read_frames(buffer.as_mut_slice()) {
            Ok(n) => n,
            Err(e) => {
                pool.revert(buffer);
                error!("[Prepare] Source failed: {}", e);
                return Err(e);
            }
        };
        if filled == 0 {
            pool.revert(buffer);
            debug!("[Prepare] Source exhausted after {} bytes", total);
            break;
        }
        if let Err(e) = buffer.set_len(filled) {
            pool.revert(buffer);
            return Err(e);
        }

        total += filled as u64;
        if let Err(mpsc::SendError(buffer)) = prepared.send(buffer) {
            // Consumer went away
            pool.revert(buffer);
            break;
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcmout_common::PcmFormat;

    /// Counts up one byte at a time for `len` bytes.
    struct Counter {
        len: usize,
        pos: usize,
        fail_at: Option<usize>,
    }

    impl PcmSource for Counter {
        fn format(&self) -> PcmFormat {
            PcmFormat::new(1, 8000, 8)
        }

        fn read_frames(&mut self, out: &mut [u8]) -> DeviceResult<usize> {
            if self.fail_at.is_some_and(|at| self.pos >= at) {
                return Err(DeviceError::Source("boom".to_string()));
            }
            let n = out.len().min(self.len - self.pos);
            for byte in &mut out[..n] {
                *byte = self.pos as u8;
                self.pos += 1;
            }
            Ok(n)
        }
    }

    fn counter(len: usize) -> Box<dyn PcmSource> {
        Box::new(Counter {
            len,
            pos: 0,
            fail_at: None,
        })
    }

    #[test]
    fn test_prepares_in_order() {
        let pool = BufferPool::new(2, 4);
        let prep = Preparation::spawn(counter(10), pool.clone()).unwrap();

        let mut seen = Vec::new();
        while let Some(buffer) = prep.next() {
            seen.extend_from_slice(buffer.as_slice());
            pool.revert(buffer);
        }

        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
        assert_eq!(prep.finish().unwrap(), 10);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_bounded_by_pool() {
        let pool = BufferPool::new(2, 4);
        let prep = Preparation::spawn(counter(100), pool.clone()).unwrap();

        let first = prep.next().unwrap();
        thread::sleep(Duration::from_millis(50));
        // One buffer held here, at most one more prepared
        assert_eq!(pool.free_count(), 0);

        pool.revert(first);
        prep.stop();
        prep.finish().unwrap();
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_source_error_surfaces_from_finish() {
        let pool = BufferPool::new(2, 4);
        let source = Box::new(Counter {
            len: 100,
            pos: 0,
            fail_at: Some(8),
        });
        let prep = Preparation::spawn(source, pool.clone()).unwrap();

        let mut got = 0;
        while let Some(buffer) = prep.next() {
            got += buffer.len();
            pool.revert(buffer);
        }

        assert_eq!(got, 8);
        assert!(matches!(prep.finish(), Err(DeviceError::Source(_))));
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_next_timeout_while_pool_is_held() {
        let pool = BufferPool::new(1, 4);
        let prep = Preparation::spawn(counter(8), pool.clone()).unwrap();

        let held = match prep.next_timeout(Duration::from_secs(2)) {
            Prepared::Ready(buffer) => buffer,
            other => panic!("expected a buffer, got {:?}", other),
        };
        assert!(matches!(
            prep.next_timeout(Duration::from_millis(20)),
            Prepared::Pending
        ));

        pool.revert(held);
        let second = match prep.next_timeout(Duration::from_secs(2)) {
            Prepared::Ready(buffer) => buffer,
            other => panic!("expected a buffer, got {:?}", other),
        };
        pool.revert(second);
        assert!(matches!(
            prep.next_timeout(Duration::from_secs(2)),
            Prepared::Done
        ));
    }

    #[test]
    fn test_drop_returns_unconsumed_buffers() {
        let pool = BufferPool::new(3, 4);
        {
            let _prep = Preparation::spawn(counter(1000), pool.clone()).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(pool.free_count(), 3);
        assert!(pool.data_finished());
    }
}
