//! Platform-agnostic output backend trait
//!
//! This module defines the interface that all native sound API bindings
//! implement. Nothing here may import a platform crate; the Windows, ALSA and
//! OSS specifics live in their own modules and are chosen at build time.

use pcmout_common::{BackendKind, Config, PcmFormat};

use crate::error::DeviceResult;
use crate::pool::{Buffer, BufferPool};

/// Native output device interface.
///
/// The trait is object-safe so the device layer can hold a
/// `Box<dyn OutputBackend>` without knowing which API sits behind it.
///
/// Every buffer passed to [`write`](OutputBackend::write) must eventually be
/// reverted to the pool given to [`open`](OutputBackend::open), exactly once,
/// whether it played, failed or was discarded by `close`.
pub trait OutputBackend: Send {
    /// Which native API this backend drives.
    fn kind(&self) -> BackendKind;

    /// Acquire and configure the native device.
    ///
    /// Called only on a closed backend. Returns the format the driver actually
    /// accepted, which may differ from `format` in its sample rate.
    fn open(&mut self, format: PcmFormat, pool: &BufferPool) -> DeviceResult<PcmFormat>;

    /// Release the native handle. Must be a no-op when already closed.
    fn close(&mut self);

    /// Whether a native handle is currently held.
    fn is_open(&self) -> bool;

    /// Submit one frame-aligned, non-empty buffer.
    ///
    /// Synchronous backends block until the driver accepted every frame and
    /// revert the buffer before returning. Asynchronous backends queue it and
    /// return at once; their completion path reverts it later.
    fn write(&mut self, buffer: Buffer) -> DeviceResult<()>;

    /// Whether all submitted audio has been played.
    ///
    /// Backends exposing driver stream state refine the default.
    fn is_drained(&self, pool: &BufferPool) -> bool {
        pool.data_finished()
    }

    /// Get the backend name (e.g., "alsa", "waveout")
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// The native backend compiled into this build.
pub fn native_backend_kind() -> Option<BackendKind> {
    #[cfg(target_os = "windows")]
    {
        Some(BackendKind::WaveOut)
    }

    #[cfg(all(target_os = "linux", feature = "alsa"))]
    {
        Some(BackendKind::Alsa)
    }

    #[cfg(all(unix, not(all(target_os = "linux", feature = "alsa"))))]
    {
        Some(BackendKind::Oss)
    }

    #[cfg(not(any(target_os = "windows", unix)))]
    {
        None
    }
}

/// Create the native output backend for the current platform.
///
/// - Windows: waveOut
/// - Linux: ALSA (`alsa` feature, on by default)
/// - Other Unix, or Linux without the `alsa` feature: OSS device file
#[cfg(target_os = "windows")]
pub fn create_backend(config: &Config) -> DeviceResult<Box<dyn OutputBackend>> {
    super::windows::create_backend(config)
}

#[cfg(all(target_os = "linux", feature = "alsa"))]
pub fn create_backend(config: &Config) -> DeviceResult<Box<dyn OutputBackend>> {
    super::linux::create_backend(config)
}

#[cfg(all(unix, not(all(target_os = "linux", feature = "alsa"))))]
pub fn create_backend(config: &Config) -> DeviceResult<Box<dyn OutputBackend>> {
    super::oss::create_backend(config)
}

// Fallback for unsupported platforms
#[cfg(not(any(target_os = "windows", unix)))]
pub fn create_backend(_config: &Config) -> DeviceResult<Box<dyn OutputBackend>> {
    Err(crate::error::DeviceError::Unsupported(
        "No native audio output backend for this platform".to_string(),
    ))
}
