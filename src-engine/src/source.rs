//! PCM sources feeding the preparation queue.
//!
//! A source produces interleaved little-endian PCM in its own
//! [`PcmFormat`]; 8-bit audio is unsigned, wider samples are signed.

use std::f32::consts::TAU;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use pcmout_common::{PcmFormat, SampleWidth};
use tracing::debug;

use crate::error::{DeviceError, DeviceResult};

/// Producer of raw PCM bytes.
pub trait PcmSource: Send {
    /// Format of every byte this source yields.
    fn format(&self) -> PcmFormat;

    /// Fill `out` with whole frames.
    ///
    /// Returns the number of bytes written, always a multiple of the frame
    /// size. Zero means the source is exhausted.
    fn read_frames(&mut self, out: &mut [u8]) -> DeviceResult<usize>;

    /// Total length in frames, when known up front.
    fn total_frames(&self) -> Option<u64> {
        None
    }
}

/// Encode one sample into `out` at the width of `width`.
fn put_sample(width: SampleWidth, sample: i32, out: &mut [u8]) {
    match width {
        SampleWidth::U8 => out[0] = (sample as i8 as u8) ^ 0x80,
        SampleWidth::S16Le => out[..2].copy_from_slice(&(sample as i16).to_le_bytes()),
        SampleWidth::S32Le => out[..4].copy_from_slice(&sample.to_le_bytes()),
    }
}

/// Integer PCM WAV file source.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    format: PcmFormat,
    width: SampleWidth,
    remaining_frames: u64,
}

impl WavSource {
    /// Open an integer PCM WAV file of 8, 16 or 32 bits per sample.
    pub fn open(path: &Path) -> DeviceResult<Self> {
        let reader = WavReader::open(path)
            .map_err(|e| DeviceError::Source(format!("{}: {}", path.display(), e)))?;
        let spec = reader.spec();

        if spec.sample_format != SampleFormat::Int {
            return Err(DeviceError::Source(format!(
                "{}: floating-point WAV is not supported",
                path.display()
            )));
        }

        let format = PcmFormat::new(spec.channels, spec.sample_rate, spec.bits_per_sample);
        let width = format
            .sample_width()
            .filter(|_| format.is_valid())
            .ok_or(DeviceError::UnsupportedFormat(format))?;

        let remaining_frames = reader.duration() as u64;
        debug!(
            "Opened WAV {} ({}, {} frames)",
            path.display(),
            format,
            remaining_frames
        );

        Ok(Self {
            reader,
            format,
            width,
            remaining_frames,
        })
    }
}

impl PcmSource for WavSource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read_frames(&mut self, out: &mut [u8]) -> DeviceResult<usize> {
        let bytes_per_sample = self.format.bytes_per_sample();
        let channels = self.format.channels as usize;
        let frames = (out.len() / self.format.bytes_per_frame())
            .min(self.remaining_frames as usize);
        if frames == 0 {
            return Ok(0);
        }

        let mut written = 0;
        for sample in self.reader.samples::<i32>().take(frames * channels) {
            let sample = sample.map_err(|e| DeviceError::Source(e.to_string()))?;
            put_sample(self.width, sample, &mut out[written..written + bytes_per_sample]);
            written += bytes_per_sample;
        }

        // A short read may end mid-frame; drop the partial frame
        let whole = self.format.bytes_to_frames(written);
        self.remaining_frames = if whole < frames {
            0
        } else {
            self.remaining_frames - whole as u64
        };
        Ok(self.format.frames_to_bytes(whole))
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.reader.duration() as u64)
    }
}

/// Sine-wave generator.
pub struct ToneSource {
    format: PcmFormat,
    width: SampleWidth,
    frequency: f32,
    amplitude: f32,
    total_frames: u64,
    position: u64,
}

impl ToneSource {
    /// A tone of `frequency` Hz lasting `duration` at half amplitude.
    pub fn new(format: PcmFormat, frequency: f32, duration: Duration) -> DeviceResult<Self> {
        let width = format
            .sample_width()
            .filter(|_| format.is_valid())
            .ok_or(DeviceError::UnsupportedFormat(format))?;
        if !(frequency > 0.0 && frequency < format.sample_rate as f32 / 2.0) {
            return Err(DeviceError::Source(format!(
                "frequency {} Hz out of range for {} Hz",
                frequency, format.sample_rate
            )));
        }

        let total_frames = (duration.as_secs_f64() * format.sample_rate as f64).round() as u64;
        Ok(Self {
            format,
            width,
            frequency,
            amplitude: 0.5,
            total_frames,
            position: 0,
        })
    }

    /// Scale the peak level, clamped to 0.0..=1.0.
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    fn sample_at(&self, frame: u64) -> i32 {
        let t = frame as f64 / self.format.sample_rate as f64;
        let value = (TAU as f64 * self.frequency as f64 * t).sin() * self.amplitude as f64;
        let peak = match self.width {
            SampleWidth::U8 => i8::MAX as f64,
            SampleWidth::S16Le => i16::MAX as f64,
            SampleWidth::S32Le => i32::MAX as f64,
        };
        (value * peak).round() as i32
    }
}

impl PcmSource for ToneSource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read_frames(&mut self, out: &mut [u8]) -> DeviceResult<usize> {
        let bytes_per_sample = self.format.bytes_per_sample();
        let remaining = self.total_frames - self.position;
        let frames = (self.format.bytes_to_frames(out.len()) as u64).min(remaining) as usize;

        let mut offset = 0;
        for _ in 0..frames {
            let sample = self.sample_at(self.position);
            for _ in 0..self.format.channels {
                put_sample(self.width, sample, &mut out[offset..offset + bytes_per_sample]);
                offset += bytes_per_sample;
            }
            self.position += 1;
        }
        Ok(offset)
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_wav(path: &Path, channels: u16, bits: u16, samples: &[i32]) {
        let spec = WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            match bits {
                8 => writer.write_sample(s as i8).unwrap(),
                16 => writer.write_sample(s as i16).unwrap(),
                _ => writer.write_sample(s).unwrap(),
            }
        }
        writer.finalize().unwrap();
    }

    fn read_all(source: &mut dyn PcmSource, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = source.read_frames(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_wav_16bit_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s16.wav");
        write_wav(&path, 2, 16, &[1, -1, 0x1234, -2]);

        let mut source = WavSource::open(&path).unwrap();
        assert_eq!(source.format(), PcmFormat::new(2, 8000, 16));
        assert_eq!(source.total_frames(), Some(2));

        let bytes = read_all(&mut source, 64);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12, 0xFE, 0xFF]);
    }

    #[test]
    fn test_wav_8bit_is_unsigned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u8.wav");
        write_wav(&path, 1, 8, &[0, -128, 127]);

        let mut source = WavSource::open(&path).unwrap();
        assert_eq!(read_all(&mut source, 16), vec![0x80, 0x00, 0xFF]);
    }

    #[test]
    fn test_wav_reads_whole_frames_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.wav");
        write_wav(&path, 2, 16, &(0..20).collect::<Vec<_>>());

        let mut source = WavSource::open(&path).unwrap();
        // 10 bytes hold two whole 4-byte frames
        let mut buf = [0u8; 10];
        assert_eq!(source.read_frames(&mut buf).unwrap(), 8);
        assert_eq!(read_all(&mut source, 10).len(), 32);
    }

    #[test]
    fn test_wav_rejects_float_and_24bit() {
        let dir = tempfile::tempdir().unwrap();

        let float_path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&float_path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();
        assert!(matches!(
            WavSource::open(&float_path),
            Err(DeviceError::Source(_))
        ));

        let s24_path = dir.path().join("s24.wav");
        write_wav(&s24_path, 1, 24, &[1, 2, 3]);
        assert!(matches!(
            WavSource::open(&s24_path),
            Err(DeviceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_wav_missing_file() {
        let result = WavSource::open(Path::new("/nonexistent/missing.wav"));
        assert!(matches!(result, Err(DeviceError::Source(_))));
    }

    #[test]
    fn test_tone_length_and_alignment() {
        let format = PcmFormat::new(2, 8000, 16);
        let mut tone = ToneSource::new(format, 440.0, Duration::from_millis(250)).unwrap();
        assert_eq!(tone.total_frames(), Some(2000));

        let bytes = read_all(&mut tone, 1001);
        assert_eq!(bytes.len(), 2000 * 4);
        assert!(format.is_frame_aligned(bytes.len()));
    }

    #[test]
    fn test_tone_starts_at_zero_and_channels_match() {
        let format = PcmFormat::new(2, 8000, 16);
        let mut tone = ToneSource::new(format, 1000.0, Duration::from_millis(10)).unwrap();
        let bytes = read_all(&mut tone, 4096);

        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        for frame in bytes.chunks(4) {
            assert_eq!(frame[0..2], frame[2..4]);
        }
    }

    #[test]
    fn test_tone_8bit_centered_on_128() {
        let format = PcmFormat::new(1, 8000, 8);
        let mut tone = ToneSource::new(format, 1000.0, Duration::from_millis(1)).unwrap();
        let bytes = read_all(&mut tone, 64);
        assert_eq!(bytes[0], 0x80);
    }

    #[test]
    fn test_tone_rejects_bad_frequency() {
        let format = PcmFormat::new(1, 8000, 16);
        assert!(ToneSource::new(format, 0.0, Duration::from_secs(1)).is_err());
        assert!(ToneSource::new(format, 4000.0, Duration::from_secs(1)).is_err());
    }
}
