//! OSS audio output module
//!
//! Used on BSDs and other Unix systems, and on Linux builds without the
//! `alsa` feature.

mod dsp;
pub mod sndstat;

pub use dsp::{create_backend, OssBackend};
