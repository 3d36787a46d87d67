//! Platform abstraction layer for audio output
//!
//! This module provides a platform-agnostic interface for PCM playback.
//! It uses conditional compilation to select exactly one native backend:
//! - Windows: waveOut (asynchronous completion callback)
//! - Linux: ALSA (synchronous, driver-negotiated parameters)
//! - Other Unix: OSS sound-device file (synchronous)
//!
//! The simulated backend is always available for tests and dry runs.

mod backend;
pub mod simulated;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(all(target_os = "linux", feature = "alsa"))]
pub mod linux;

#[cfg(all(unix, not(all(target_os = "linux", feature = "alsa"))))]
pub mod oss;

// Re-export public types
pub use backend::{create_backend, native_backend_kind, OutputBackend};
pub use simulated::{CompletionTiming, SimulatedBackend, SimulatedController};
