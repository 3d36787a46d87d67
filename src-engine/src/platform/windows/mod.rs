//! Windows audio output module
//!
//! Plays PCM through the waveOut API on the system wave mapper.

mod waveout;

pub use waveout::{create_backend, WaveOutBackend};
