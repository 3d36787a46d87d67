//! Linux audio output module
//!
//! Provides PCM playback through ALSA with driver-negotiated hardware
//! parameters.

mod alsa_output;

pub use self::alsa_output::{create_backend, AlsaBackend};
