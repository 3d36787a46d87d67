//! Producer-facing audio output device.
//!
//! [`AudioDevice`] owns one [`OutputBackend`] and the [`BufferPool`] its
//! buffers come from. It enforces the device state machine
//! (closed → open → closed), validates buffers before they reach the driver,
//! and implements the coarse drain poll shared by every backend.

use std::thread;
use std::time::Duration;

use pcmout_common::{Config, DeviceState, PcmFormat};
use tracing::{debug, info, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::platform::{self, OutputBackend};
use crate::pool::{Buffer, BufferPool};

/// Default interval between drain polls
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(200);

/// One logical PCM output device.
pub struct AudioDevice {
    backend: Box<dyn OutputBackend>,
    pool: BufferPool,
    format: Option<PcmFormat>,
    drain_poll: Duration,
}

impl AudioDevice {
    /// Wrap `backend`; buffers written to the device must come from `pool`.
    pub fn new(backend: Box<dyn OutputBackend>, pool: BufferPool) -> Self {
        Self {
            backend,
            pool,
            format: None,
            drain_poll: DEFAULT_DRAIN_POLL,
        }
    }

    /// Create a device on the native backend compiled for this platform.
    pub fn with_platform_backend(config: &Config, pool: BufferPool) -> DeviceResult<Self> {
        let backend = platform::create_backend(config)?;
        let mut device = Self::new(backend, pool);
        device.set_drain_poll_interval(Duration::from_millis(config.drain_poll_ms));
        Ok(device)
    }

    pub fn set_drain_poll_interval(&mut self, interval: Duration) {
        self.drain_poll = interval.max(Duration::from_millis(1));
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Open the device, closing any previous handle first.
    ///
    /// Returns the negotiated format; the driver may have adjusted the sample
    /// rate to the nearest one it supports.
    pub fn try_open(
        &mut self,
        channels: u16,
        rate: u32,
        bits_per_sample: u16,
    ) -> DeviceResult<PcmFormat> {
        self.close();

        let requested = PcmFormat::new(channels, rate, bits_per_sample);
        if !requested.is_valid() {
            return Err(DeviceError::UnsupportedFormat(requested));
        }
        if self.pool.buffer_capacity() < requested.bytes_per_frame() {
            return Err(DeviceError::Configure(format!(
                "buffers of {} bytes cannot hold one {}-byte frame",
                self.pool.buffer_capacity(),
                requested.bytes_per_frame()
            )));
        }

        let negotiated = self.backend.open(requested, &self.pool)?;
        if negotiated.sample_rate != requested.sample_rate {
            info!(
                "[Device] {} adjusted sample rate {} Hz -> {} Hz",
                self.backend.name(),
                requested.sample_rate,
                negotiated.sample_rate
            );
        }
        info!(
            "[Device] Opened {} output: {} ({} bytes/frame)",
            self.backend.name(),
            negotiated,
            negotiated.bytes_per_frame()
        );

        self.format = Some(negotiated);
        Ok(negotiated)
    }

    /// Open the device. Failure is reported as `false`.
    pub fn open(&mut self, channels: u16, rate: u32, bits_per_sample: u16) -> bool {
        match self.try_open(channels, rate, bits_per_sample) {
            Ok(_) => true,
            Err(e) => {
                warn!("[Device] Failed to open {} output: {}", self.backend.name(), e);
                false
            }
        }
    }

    /// Release the native handle. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.backend.is_open() {
            self.backend.close();
            info!("[Device] Closed {} output", self.backend.name());
        }
        self.format = None;
    }

    /// True iff the device is closed.
    pub fn empty(&self) -> bool {
        !self.backend.is_open()
    }

    pub fn state(&self) -> DeviceState {
        if self.empty() {
            DeviceState::Closed
        } else {
            DeviceState::Open
        }
    }

    /// Format negotiated by the last successful `open`.
    pub fn format(&self) -> Option<PcmFormat> {
        self.format.filter(|_| !self.empty())
    }

    pub fn bytes_per_frame(&self) -> Option<usize> {
        self.format().map(|f| f.bytes_per_frame())
    }

    /// Submit one filled buffer.
    ///
    /// A buffer that cannot be played (device closed, length not a whole
    /// number of frames) goes straight back to the pool and an error is
    /// returned. Empty buffers are reverted without touching the driver. A
    /// buffer handed out by some other pool is dropped.
    pub fn write(&mut self, mut buffer: Buffer) -> DeviceResult<()> {
        if !self.pool.owns(&buffer) {
            warn!("[Device] Rejecting buffer {} from a foreign pool", buffer.id());
            return Err(DeviceError::ForeignBuffer { id: buffer.id() });
        }

        let Some(format) = self.format() else {
            self.pool.revert(buffer);
            return Err(DeviceError::NotOpen);
        };

        let bytes_per_frame = format.bytes_per_frame();
        if !format.is_frame_aligned(buffer.len()) {
            let len = buffer.len();
            self.pool.revert(buffer);
            return Err(DeviceError::Misaligned {
                len,
                bytes_per_frame,
            });
        }

        if buffer.is_empty() {
            self.pool.revert(buffer);
            return Ok(());
        }

        debug!(
            "[Device] Writing buffer {} ({} frames)",
            buffer.id(),
            buffer.len() / bytes_per_frame
        );
        self.pool.begin_flight(&mut buffer);
        self.backend.write(buffer)
    }

    /// Block until all submitted audio has played.
    ///
    /// Polls every drain interval; returns at once on a closed device.
    pub fn wait_for_drain(&self) {
        if self.empty() {
            return;
        }
        while !self.backend.is_drained(&self.pool) {
            thread::sleep(self.drain_poll);
        }
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}
