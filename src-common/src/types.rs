//! Shared types for pcmout devices and PCM formats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sample encodings the output backends can negotiate.
///
/// 8-bit PCM is unsigned, wider widths are signed little-endian, matching the
/// layout every supported native API expects for interleaved PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleWidth {
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit little-endian
    S16Le,
    /// Signed 32-bit little-endian
    S32Le,
}

impl SampleWidth {
    /// Map a bits-per-sample value onto a supported width.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(SampleWidth::U8),
            16 => Some(SampleWidth::S16Le),
            32 => Some(SampleWidth::S32Le),
            _ => None,
        }
    }

    pub fn bits(&self) -> u16 {
        match self {
            SampleWidth::U8 => 8,
            SampleWidth::S16Le => 16,
            SampleWidth::S32Le => 32,
        }
    }

    pub fn bytes(&self) -> usize {
        (self.bits() >> 3) as usize
    }
}

/// Interleaved PCM format of one output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Number of interleaved channels
    pub channels: u16,
    /// Frames per second
    pub sample_rate: u32,
    /// Bits per single-channel sample
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub const fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
        }
    }

    /// Stereo, 44.1 kHz, 16-bit.
    pub const fn cd_quality() -> Self {
        Self::new(2, 44100, 16)
    }

    /// The supported sample width for `bits_per_sample`, if any.
    pub fn sample_width(&self) -> Option<SampleWidth> {
        SampleWidth::from_bits(self.bits_per_sample)
    }

    /// True when channels and rate are non-zero and the width is supported.
    pub fn is_valid(&self) -> bool {
        self.channels > 0 && self.sample_rate > 0 && self.sample_width().is_some()
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample >> 3) as usize
    }

    /// Size of one frame: one sample for every channel.
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    /// Whether a byte length holds a whole number of frames.
    pub fn is_frame_aligned(&self, len: usize) -> bool {
        let frame = self.bytes_per_frame();
        frame != 0 && len % frame == 0
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        match self.bytes_per_frame() {
            0 => 0,
            frame => bytes / frame,
        }
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.bytes_to_frames(bytes) as u64;
        Duration::from_nanos(frames * 1_000_000_000 / self.sample_rate as u64)
    }

    /// Same format with a different sample rate (used when a driver adjusts it).
    pub fn with_sample_rate(self, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..self
        }
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::cd_quality()
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ch {} Hz {}-bit",
            self.channels, self.sample_rate, self.bits_per_sample
        )
    }
}

/// Native sound API family behind an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Windows multimedia waveform API (`waveOut*`)
    WaveOut,
    /// Linux ALSA PCM
    Alsa,
    /// Unix sound-device file (`/dev/dsp*`)
    Oss,
    /// In-process device without hardware
    Simulated,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::WaveOut => "waveout",
            BackendKind::Alsa => "alsa",
            BackendKind::Oss => "oss",
            BackendKind::Simulated => "simulated",
        }
    }

    /// Whether buffers are reclaimed from a driver callback rather than
    /// inside `write`.
    pub fn is_asynchronous(&self) -> bool {
        matches!(self, BackendKind::WaveOut | BackendKind::Simulated)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open/closed state of an output device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    #[default]
    Closed,
    Open,
}

/// Runtime mode - selects logging defaults.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Development mode - verbose console logging
    Development,
    /// Production mode
    #[default]
    Production,
}

impl RuntimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::Development => "development",
            RuntimeMode::Production => "production",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cd_quality_frame_size() {
        let format = PcmFormat::new(2, 44100, 16);
        assert_eq!(format.bytes_per_sample(), 2);
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.bytes_per_second(), 176_400);
        assert!(format.is_frame_aligned(4096));
        assert!(!format.is_frame_aligned(4095));
    }

    #[test]
    fn test_sample_width_mapping() {
        assert_eq!(SampleWidth::from_bits(8), Some(SampleWidth::U8));
        assert_eq!(SampleWidth::from_bits(16), Some(SampleWidth::S16Le));
        assert_eq!(SampleWidth::from_bits(32), Some(SampleWidth::S32Le));
        assert_eq!(SampleWidth::from_bits(24), None);
        assert_eq!(SampleWidth::S32Le.bytes(), 4);
    }

    #[test]
    fn test_validity() {
        assert!(PcmFormat::cd_quality().is_valid());
        assert!(!PcmFormat::new(0, 44100, 16).is_valid());
        assert!(!PcmFormat::new(2, 0, 16).is_valid());
        assert!(!PcmFormat::new(2, 44100, 12).is_valid());
    }

    #[test]
    fn test_zero_width_is_never_aligned() {
        let format = PcmFormat::new(2, 44100, 4);
        assert_eq!(format.bytes_per_frame(), 0);
        assert!(!format.is_frame_aligned(0));
        assert_eq!(format.bytes_to_frames(128), 0);
    }

    #[test]
    fn test_duration_of() {
        let format = PcmFormat::new(1, 8000, 8);
        assert_eq!(format.duration_of(8000), Duration::from_secs(1));
        assert_eq!(format.duration_of(800), Duration::from_millis(100));
    }

    #[test]
    fn test_completion_style_per_backend() {
        assert!(BackendKind::WaveOut.is_asynchronous());
        assert!(BackendKind::Simulated.is_asynchronous());
        assert!(!BackendKind::Alsa.is_asynchronous());
        assert!(!BackendKind::Oss.is_asynchronous());
    }

    #[test]
    fn test_display() {
        assert_eq!(PcmFormat::cd_quality().to_string(), "2ch 44100 Hz 16-bit");
        assert_eq!(BackendKind::WaveOut.to_string(), "waveout");
    }
}
