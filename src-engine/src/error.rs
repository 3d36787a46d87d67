//! Output device error types

use pcmout_common::PcmFormat;
use thiserror::Error;

/// Errors that can occur while driving an output device
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The native device could not be acquired
    #[error("Failed to acquire audio device: {0}")]
    Acquire(String),

    /// The driver rejected the stream configuration
    #[error("Failed to configure audio device: {0}")]
    Configure(String),

    /// Requested format is not supported by this backend
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(PcmFormat),

    /// No native backend exists for this platform
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// `write` called while the device is closed
    #[error("Audio device is not open")]
    NotOpen,

    /// Buffer length is not a whole number of frames
    #[error("Buffer of {len} bytes is not aligned to {bytes_per_frame}-byte frames")]
    Misaligned { len: usize, bytes_per_frame: usize },

    /// Buffer was not handed out by the device's pool
    #[error("Buffer {id} does not belong to this device's pool")]
    ForeignBuffer { id: usize },

    /// More bytes than a buffer can hold
    #[error("Length {len} exceeds buffer capacity {capacity}")]
    Overflow { len: usize, capacity: usize },

    /// The driver failed while accepting audio
    #[error("Failed to write to audio device: {0}")]
    Write(String),

    /// A PCM source failed to produce audio
    #[error("Audio source error: {0}")]
    Source(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
