//! End-to-end playback of a [`PcmSource`] through one output backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pcmout_common::{Config, PcmFormat};
use serde::Serialize;
use tracing::{info, warn};

use crate::device::AudioDevice;
use crate::error::{DeviceError, DeviceResult};
use crate::platform::OutputBackend;
use crate::pool::BufferPool;
use crate::prepare::{Prepared, Preparation};
use crate::source::PcmSource;

/// How often a player waiting on the preparation thread checks the stop flag
const STOP_POLL: Duration = Duration::from_millis(50);

/// Pool sizing and drain behaviour for a playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSettings {
    pub buffer_count: usize,
    pub buffer_ms: u32,
    pub drain_poll: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PlayerSettings {
    fn from(config: &Config) -> Self {
        Self {
            buffer_count: config.buffer_count.max(1),
            buffer_ms: config.buffer_ms.max(1),
            drain_poll: Duration::from_millis(config.drain_poll_ms.max(1)),
        }
    }
}

/// Summary of a finished playback.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStats {
    /// Format the driver accepted
    pub format: PcmFormat,
    pub buffers: u64,
    pub bytes: u64,
    /// Whether playback ended through the stop flag
    pub stopped: bool,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl PlaybackStats {
    /// Length of the audio that was written.
    pub fn audio_duration(&self) -> Duration {
        self.format.duration_of(self.bytes as usize)
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Plays sources to completion.
pub struct Player {
    settings: PlayerSettings,
    stop: Arc<AtomicBool>,
}

impl Player {
    pub fn new(settings: PlayerSettings) -> Self {
        Self {
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends playback early once set, e.g. from a Ctrl+C handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Open `backend` in the source's format, play everything, drain, close.
    pub fn play(
        &self,
        backend: Box<dyn OutputBackend>,
        source: Box<dyn PcmSource>,
    ) -> DeviceResult<PlaybackStats> {
        let started = Instant::now();
        let requested = source.format();
        if !requested.is_valid() {
            return Err(DeviceError::UnsupportedFormat(requested));
        }

        let pool = BufferPool::for_format(
            &requested,
            self.settings.buffer_count,
            self.settings.buffer_ms,
        );
        let mut device = AudioDevice::new(backend, pool.clone());
        device.set_drain_poll_interval(self.settings.drain_poll);

        let format = device.try_open(
            requested.channels,
            requested.sample_rate,
            requested.bits_per_sample,
        )?;
        info!(
            "[Player] Playing {} via {} ({} x {} bytes)",
            format,
            device.backend_name(),
            pool.buffer_count(),
            pool.buffer_capacity()
        );

        let preparation = Preparation::spawn(source, pool)?;
        let mut buffers = 0u64;
        let mut bytes = 0u64;
        let mut write_error = None;

        while !self.stopped() {
            let buffer = match preparation.next_timeout(STOP_POLL) {
                Prepared::Ready(buffer) => buffer,
                Prepared::Pending => continue,
                Prepared::Done => break,
            };
            let len = buffer.len() as u64;
            if let Err(e) = device.write(buffer) {
                write_error = Some(e);
                break;
            }
            buffers += 1;
            bytes += len;
        }

        preparation.stop();
        let prepared = preparation.finish();

        let stopped = self.stopped();
        if stopped {
            info!("[Player] Stopped after {} buffer(s)", buffers);
        } else if write_error.is_none() {
            device.wait_for_drain();
        }
        device.close();

        if let Some(e) = write_error {
            warn!("[Player] Write failed after {} buffer(s): {}", buffers, e);
            return Err(e);
        }
        prepared?;

        let stats = PlaybackStats {
            format,
            buffers,
            bytes,
            stopped,
            elapsed: started.elapsed(),
        };
        info!(
            "[Player] Finished: {} buffer(s), {} bytes, {:.2}s of audio in {:.2}s",
            stats.buffers,
            stats.bytes,
            stats.audio_duration().as_secs_f64(),
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }
}
