//! pcmout Engine
//!
//! Cross-platform PCM output. An [`AudioDevice`] hands fixed-size buffers
//! from a [`BufferPool`] to exactly one native backend (waveOut on Windows,
//! ALSA on Linux, the OSS device file elsewhere on Unix) and gets every
//! buffer back once the driver is done with it.
//!
//! The [`Player`] drives a whole [`PcmSource`] through a device, with a
//! background [`Preparation`] thread filling buffers ahead of playback.

pub mod completion;
pub mod config;
pub mod device;
pub mod error;
pub mod platform;
pub mod player;
pub mod pool;
pub mod prepare;
pub mod source;

pub use completion::CompletionQueue;
pub use device::{AudioDevice, DEFAULT_DRAIN_POLL};
pub use error::{DeviceError, DeviceResult};
pub use platform::{
    create_backend, native_backend_kind, CompletionTiming, OutputBackend, SimulatedBackend,
    SimulatedController,
};
pub use player::{PlaybackStats, Player, PlayerSettings};
pub use pool::{Buffer, BufferPool, PoolStats};
pub use prepare::{Prepared, Preparation};
pub use source::{PcmSource, ToneSource, WavSource};

pub use pcmout_common::{BackendKind, Config, DeviceState, PcmFormat, SampleWidth};
