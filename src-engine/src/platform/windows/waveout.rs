//! waveOut playback backend
//!
//! Buffers are prepared, queued on a [`CompletionQueue`] and submitted with
//! `waveOutWrite`. The driver calls [`wave_out_proc`] once per finished
//! header. waveOut functions may not be called from inside that callback, so
//! it only signals a notifier thread, which pops the queue head, unprepares
//! the header and reverts the buffer to the pool.

use std::mem::size_of;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pcmout_common::{BackendKind, Config, PcmFormat};
use tracing::{debug, error, info, warn};
use windows::core::PSTR;
use windows::Win32::Media::Audio::{
    waveOutClose, waveOutOpen, waveOutPrepareHeader, waveOutReset, waveOutUnprepareHeader,
    waveOutWrite, CALLBACK_FUNCTION, HWAVEOUT, WAVEFORMATEX, WAVEHDR, WAVE_FORMAT_PCM,
    WAVE_MAPPER, WOM_DONE,
};

use crate::completion::CompletionQueue;
use crate::error::{DeviceError, DeviceResult};
use crate::platform::OutputBackend;
use crate::pool::{Buffer, BufferPool};

const MMSYSERR_NOERROR: u32 = 0;

/// How long `close` waits for reset buffers to come back
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// `waveOutClose` attempts before the handle is abandoned
const CLOSE_ATTEMPTS: usize = 3;

/// Device handle that can cross into the notifier thread.
#[derive(Clone, Copy)]
struct WaveHandle(HWAVEOUT);

// SAFETY: HWAVEOUT is an opaque kernel handle; waveOut calls on it are
// thread-safe outside the driver callback.
unsafe impl Send for WaveHandle {}
unsafe impl Sync for WaveHandle {}

/// A buffer owned by the driver together with its header.
struct Pending {
    buffer: Buffer,
    header: Box<WAVEHDR>,
}

// SAFETY: the raw pointer inside WAVEHDR points into `buffer`, which moves
// with it; neither is touched by more than one thread at a time.
unsafe impl Send for Pending {}

/// State reachable from the driver callback through `dwInstance`.
struct CallbackContext {
    done: Mutex<Sender<()>>,
}

/// Driver callback. Only signals; never calls back into waveOut.
unsafe extern "system" fn wave_out_proc(
    _hwo: HWAVEOUT,
    msg: u32,
    instance: usize,
    _param1: usize,
    _param2: usize,
) {
    if msg != WOM_DONE || instance == 0 {
        return;
    }
    let context = &*(instance as *const CallbackContext);
    let sender = context.done.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = sender.send(());
}

fn wave_format(format: &PcmFormat) -> WAVEFORMATEX {
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_PCM as u16,
        nChannels: format.channels,
        nSamplesPerSec: format.sample_rate,
        nAvgBytesPerSec: format.bytes_per_second() as u32,
        nBlockAlign: format.bytes_per_frame() as u16,
        wBitsPerSample: format.bits_per_sample,
        cbSize: 0,
    }
}

/// Unprepare a finished header and give its buffer back.
fn retire(handle: WaveHandle, mut pending: Pending, pool: &BufferPool) {
    let rc = unsafe {
        waveOutUnprepareHeader(
            handle.0,
            pending.header.as_mut() as *mut WAVEHDR,
            size_of::<WAVEHDR>() as u32,
        )
    };
    if rc != MMSYSERR_NOERROR {
        error!(
            "[WaveOut] waveOutUnprepareHeader failed for buffer {} (code {})",
            pending.buffer.id(),
            rc
        );
    }
    debug!("[WaveOut] Buffer {} done", pending.buffer.id());
    pool.revert(pending.buffer);
}

/// Completion notifier: one queue head per driver signal.
fn run_notifier(
    done: Receiver<()>,
    handle: WaveHandle,
    queue: Arc<CompletionQueue<Pending>>,
    pool: BufferPool,
) {
    while done.recv().is_ok() {
        match queue.pop_front() {
            Some(pending) => retire(handle, pending, &pool),
            None => warn!("[WaveOut] Completion signalled with an empty queue"),
        }
    }
    debug!("[WaveOut] Notifier exiting");
}

/// Wait until every in-flight buffer has been reverted, or the timeout passes.
///
/// A buffer leaves the completion queue before it is unprepared, so an empty
/// queue alone does not mean the notifier is finished with it.
fn settle(pool: &BufferPool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !pool.data_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

struct OpenDevice {
    handle: WaveHandle,
    // Must outlive the driver handle; the callback dereferences it
    context: Box<CallbackContext>,
    notifier: JoinHandle<()>,
    pool: BufferPool,
}

/// waveOut output backend
pub struct WaveOutBackend {
    queue: Arc<CompletionQueue<Pending>>,
    device: Option<OpenDevice>,
}

impl WaveOutBackend {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(CompletionQueue::new()),
            device: None,
        }
    }
}

impl Default for WaveOutBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for WaveOutBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WaveOut
    }

    fn open(&mut self, format: PcmFormat, pool: &BufferPool) -> DeviceResult<PcmFormat> {
        self.close();

        if format.sample_width().is_none() {
            return Err(DeviceError::UnsupportedFormat(format));
        }

        let (tx, rx) = mpsc::channel();
        let context = Box::new(CallbackContext {
            done: Mutex::new(tx),
        });
        let wfx = wave_format(&format);
        let mut handle = HWAVEOUT::default();

        let rc = unsafe {
            waveOutOpen(
                Some(&mut handle as *mut HWAVEOUT),
                WAVE_MAPPER,
                &wfx,
                wave_out_proc as usize,
                context.as_ref() as *const CallbackContext as usize,
                CALLBACK_FUNCTION,
            )
        };
        if rc != MMSYSERR_NOERROR {
            return Err(DeviceError::Acquire(format!(
                "waveOutOpen failed for {} (code {})",
                format, rc
            )));
        }

        let handle = WaveHandle(handle);
        let queue = Arc::clone(&self.queue);
        let notifier_pool = pool.clone();
        let notifier = thread::Builder::new()
            .name("waveout-notifier".to_string())
            .spawn(move || run_notifier(rx, handle, queue, notifier_pool))
            .map_err(|e| {
                unsafe {
                    waveOutClose(handle.0);
                }
                DeviceError::Acquire(format!("cannot start notifier thread: {}", e))
            })?;

        info!("[WaveOut] Opened wave mapper ({})", format);
        self.device = Some(OpenDevice {
            handle,
            context,
            notifier,
            pool: pool.clone(),
        });
        Ok(format)
    }

    fn close(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };

        // Reset marks every queued header done; the notifier reverts them
        unsafe {
            waveOutReset(device.handle.0);
        }
        if !settle(&device.pool, CLOSE_TIMEOUT) {
            warn!(
                "[WaveOut] {} buffer(s) still in flight after reset",
                device.pool.in_flight()
            );
        }

        let mut rc = unsafe { waveOutClose(device.handle.0) };
        for _ in 1..CLOSE_ATTEMPTS {
            if rc == MMSYSERR_NOERROR {
                break;
            }
            warn!("[WaveOut] waveOutClose returned code {}; retrying", rc);
            unsafe {
                waveOutReset(device.handle.0);
            }
            settle(&device.pool, CLOSE_TIMEOUT);
            rc = unsafe { waveOutClose(device.handle.0) };
        }

        if rc != MMSYSERR_NOERROR {
            // The driver still holds the handle and may call back or touch the
            // queued headers. Leak everything it can reach.
            error!(
                "[WaveOut] waveOutClose failed (code {}); abandoning {} buffer(s)",
                rc,
                self.queue.len()
            );
            // The notifier keeps its own reference to the old queue and
            // stays parked on a sender that is never dropped.
            std::mem::forget(device.context);
            drop(device.notifier);
            self.queue = Arc::new(CompletionQueue::new());
            return;
        }

        // Dropping the last sender ends the notifier loop
        drop(device.context);
        if device.notifier.join().is_err() {
            error!("[WaveOut] Notifier thread panicked");
        }

        let leftovers = self.queue.take_all();
        if !leftovers.is_empty() {
            warn!(
                "[WaveOut] {} buffer(s) never completed; reclaiming",
                leftovers.len()
            );
        }
        for pending in leftovers {
            device.pool.revert(pending.buffer);
        }

        info!("[WaveOut] Closed");
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn write(&mut self, mut buffer: Buffer) -> DeviceResult<()> {
        let Some(device) = self.device.as_ref() else {
            warn!("[WaveOut] Write on closed device; buffer {} dropped", buffer.id());
            return Err(DeviceError::NotOpen);
        };

        let mut header = Box::new(WAVEHDR {
            lpData: PSTR(buffer.as_mut_ptr()),
            dwBufferLength: buffer.len() as u32,
            ..Default::default()
        });
        let header_ptr = header.as_mut() as *mut WAVEHDR;
        let header_size = size_of::<WAVEHDR>() as u32;

        let rc = unsafe { waveOutPrepareHeader(device.handle.0, header_ptr, header_size) };
        if rc != MMSYSERR_NOERROR {
            device.pool.revert(buffer);
            return Err(DeviceError::Write(format!(
                "waveOutPrepareHeader failed (code {})",
                rc
            )));
        }

        let id = buffer.id();
        // Queue before submitting so the completion can never precede the record
        self.queue.push_back(Pending { buffer, header });

        let rc = unsafe { waveOutWrite(device.handle.0, header_ptr, header_size) };
        if rc != MMSYSERR_NOERROR {
            if let Some(pending) = self.queue.pop_back() {
                retire(device.handle, pending, &device.pool);
            }
            return Err(DeviceError::Write(format!(
                "waveOutWrite failed for buffer {} (code {})",
                id, rc
            )));
        }

        debug!("[WaveOut] Buffer {} submitted", id);
        Ok(())
    }

    fn is_drained(&self, pool: &BufferPool) -> bool {
        self.queue.is_empty() && pool.data_finished()
    }
}

impl Drop for WaveOutBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create the waveOut backend on the default wave mapper.
pub fn create_backend(_config: &Config) -> DeviceResult<Box<dyn OutputBackend>> {
    Ok(Box::new(WaveOutBackend::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_format_fields() {
        let wfx = wave_format(&PcmFormat::new(2, 44100, 16));
        assert_eq!(wfx.wFormatTag, WAVE_FORMAT_PCM as u16);
        assert_eq!(wfx.nChannels, 2);
        assert_eq!(wfx.nSamplesPerSec, 44100);
        assert_eq!(wfx.nBlockAlign, 4);
        assert_eq!(wfx.nAvgBytesPerSec, 176_400);
        assert_eq!(wfx.wBitsPerSample, 16);
    }

    #[test]
    fn test_unsupported_width_rejected() {
        let pool = BufferPool::new(1, 64);
        let mut backend = WaveOutBackend::new();
        let result = backend.open(PcmFormat::new(2, 44100, 24), &pool);
        assert!(matches!(result, Err(DeviceError::UnsupportedFormat(_))));
        assert!(!backend.is_open());
    }

    #[test]
    fn test_settle_waits_for_late_revert() {
        let pool = BufferPool::new(1, 64);
        let mut buffer = pool.acquire();
        pool.begin_flight(&mut buffer);
        assert!(!pool.data_finished());

        let notifier_pool = pool.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            notifier_pool.revert(buffer);
        });

        assert!(settle(&pool, Duration::from_secs(2)));
        assert_eq!(pool.free_count(), 1);
        worker.join().unwrap();
    }

    #[test]
    fn test_settle_gives_up_at_deadline() {
        let pool = BufferPool::new(1, 64);
        let mut buffer = pool.acquire();
        pool.begin_flight(&mut buffer);

        let start = Instant::now();
        assert!(!settle(&pool, Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));

        pool.revert(buffer);
        assert!(settle(&pool, Duration::ZERO));
    }

    #[test]
    fn test_close_when_never_opened() {
        let mut backend = WaveOutBackend::new();
        backend.close();
        backend.close();
        assert!(!backend.is_open());
    }
}
