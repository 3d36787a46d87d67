//! Simulated output backend
//!
//! Behaves like an asynchronous driver without touching hardware: `write`
//! queues the buffer on a [`CompletionQueue`] and a completion path later pops
//! the head and reverts it. Completion is driven by a timer thread or, in
//! [`CompletionTiming::Manual`] mode, by a [`SimulatedController`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pcmout_common::{BackendKind, PcmFormat};
use tracing::{debug, info, warn};

use super::OutputBackend;
use crate::completion::CompletionQueue;
use crate::error::{DeviceError, DeviceResult};
use crate::pool::{Buffer, BufferPool};

/// Granularity of the completion timer thread
const TICK: Duration = Duration::from_millis(1);

/// How the simulated driver decides a buffer has finished playing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompletionTiming {
    /// Only [`SimulatedController::complete_one`] completes buffers
    Manual,
    /// Every buffer plays for a fixed time, one after another
    Latency(Duration),
    /// Buffers play for their real duration divided by `speed`
    Realtime { speed: f32 },
}

struct Pending {
    buffer: Buffer,
    due: Option<Instant>,
}

struct SimShared {
    queue: CompletionQueue<Pending>,
    pool: Mutex<Option<BufferPool>>,
    submitted: Mutex<Vec<usize>>,
    completed: Mutex<Vec<usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimShared {
    /// The completion notifier: pop the oldest record and revert its buffer.
    fn complete_head(&self) -> Option<usize> {
        let pending = self.queue.pop_front()?;
        let id = pending.buffer.id();
        lock(&self.completed).push(id);
        match lock(&self.pool).as_ref() {
            Some(pool) => pool.revert(pending.buffer),
            None => warn!("[Simulated] Completed buffer {} with no pool attached", id),
        }
        debug!("[Simulated] Buffer {} completed", id);
        Some(id)
    }
}

/// Test-side handle observing and driving a [`SimulatedBackend`].
#[derive(Clone)]
pub struct SimulatedController {
    shared: Arc<SimShared>,
}

impl SimulatedController {
    /// Signal one completion. Returns the id of the reverted buffer.
    pub fn complete_one(&self) -> Option<usize> {
        self.shared.complete_head()
    }

    /// Complete everything currently queued. Returns how many completed.
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.shared.complete_head().is_some() {
            count += 1;
        }
        count
    }

    /// Buffers submitted but not yet completed.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Buffer ids in submission order.
    pub fn submitted_ids(&self) -> Vec<usize> {
        lock(&self.shared.submitted).clone()
    }

    /// Buffer ids in completion order.
    pub fn completed_ids(&self) -> Vec<usize> {
        lock(&self.shared.completed).clone()
    }
}

/// Asynchronous output backend without hardware.
pub struct SimulatedBackend {
    timing: CompletionTiming,
    refuse_open: bool,
    negotiated_rate: Option<u32>,
    shared: Arc<SimShared>,
    format: Option<PcmFormat>,
    last_due: Option<Instant>,
    worker: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl SimulatedBackend {
    pub fn new(timing: CompletionTiming) -> Self {
        Self {
            timing,
            refuse_open: false,
            negotiated_rate: None,
            shared: Arc::new(SimShared {
                queue: CompletionQueue::new(),
                pool: Mutex::new(None),
                submitted: Mutex::new(Vec::new()),
                completed: Mutex::new(Vec::new()),
            }),
            format: None,
            last_due: None,
            worker: None,
        }
    }

    /// Completions happen only through the controller.
    pub fn manual() -> Self {
        Self::new(CompletionTiming::Manual)
    }

    /// Each buffer takes `latency` to play.
    pub fn with_latency(latency: Duration) -> Self {
        Self::new(CompletionTiming::Latency(latency))
    }

    /// Buffers take as long as their audio lasts.
    pub fn realtime() -> Self {
        Self::new(CompletionTiming::Realtime { speed: 1.0 })
    }

    /// Make every `open` fail as if the device were busy.
    pub fn refuse_open(mut self, refuse: bool) -> Self {
        self.refuse_open = refuse;
        self
    }

    /// Pretend the driver only supports `rate` and adjusts to it.
    pub fn with_negotiated_rate(mut self, rate: u32) -> Self {
        self.negotiated_rate = Some(rate);
        self
    }

    pub fn controller(&self) -> SimulatedController {
        SimulatedController {
            shared: Arc::clone(&self.shared),
        }
    }

    fn play_time(&self, format: &PcmFormat, bytes: usize) -> Option<Duration> {
        match self.timing {
            CompletionTiming::Manual => None,
            CompletionTiming::Latency(latency) => Some(latency),
            CompletionTiming::Realtime { speed } => {
                let speed = if speed > 0.0 { speed } else { 1.0 };
                Some(format.duration_of(bytes).div_f32(speed))
            }
        }
    }

    fn start_worker(&mut self) {
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match shared.queue.peek_front(|p| p.due) {
                    Some(Some(due)) => {
                        let now = Instant::now();
                        if now >= due {
                            shared.complete_head();
                        } else {
                            thread::sleep((due - now).min(TICK));
                        }
                    }
                    _ => thread::sleep(TICK),
                }
            }
        });

        self.worker = Some((stop, handle));
    }

    fn stop_worker(&mut self) {
        if let Some((stop, handle)) = self.worker.take() {
            stop.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                warn!("[Simulated] Completion thread panicked");
            }
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::realtime()
    }
}

impl OutputBackend for SimulatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }

    fn open(&mut self, format: PcmFormat, pool: &BufferPool) -> DeviceResult<PcmFormat> {
        self.close();
        if self.refuse_open {
            return Err(DeviceError::Acquire(
                "simulated device refused to open".to_string(),
            ));
        }

        let negotiated = match self.negotiated_rate {
            Some(rate) => format.with_sample_rate(rate),
            None => format,
        };

        *lock(&self.shared.pool) = Some(pool.clone());
        self.format = Some(negotiated);
        self.last_due = None;
        if !matches!(self.timing, CompletionTiming::Manual) {
            self.start_worker();
        }

        info!("[Simulated] Opened ({}, {:?})", negotiated, self.timing);
        Ok(negotiated)
    }

    fn close(&mut self) {
        if self.format.take().is_none() {
            return;
        }

        self.stop_worker();

        let leftovers = self.shared.queue.take_all();
        let discarded = leftovers.len();
        if let Some(pool) = lock(&self.shared.pool).take() {
            for pending in leftovers {
                pool.revert(pending.buffer);
            }
        }
        self.last_due = None;

        info!("[Simulated] Closed ({} pending buffer(s) discarded)", discarded);
    }

    fn is_open(&self) -> bool {
        self.format.is_some()
    }

    fn write(&mut self, buffer: Buffer) -> DeviceResult<()> {
        let Some(format) = self.format else {
            warn!("[Simulated] Write on closed device; buffer {} dropped", buffer.id());
            return Err(DeviceError::NotOpen);
        };

        let due = self.play_time(&format, buffer.len()).map(|play_time| {
            let now = Instant::now();
            let start = match self.last_due {
                Some(last) if last > now => last,
                _ => now,
            };
            start + play_time
        });
        self.last_due = due;

        lock(&self.shared.submitted).push(buffer.id());
        debug!("[Simulated] Buffer {} queued ({} bytes)", buffer.id(), buffer.len());
        self.shared.queue.push_back(Pending { buffer, due });
        Ok(())
    }

    fn is_drained(&self, pool: &BufferPool) -> bool {
        self.shared.queue.is_empty() && pool.data_finished()
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.close();
    }
}
