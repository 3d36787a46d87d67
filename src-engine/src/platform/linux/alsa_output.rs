//! ALSA playback backend
//!
//! Opens a PCM by name, negotiates interleaved access, sample format, rate
//! (nearest supported) and channel count, then writes buffers synchronously
//! with `snd_pcm_writei`. An underrun (`EPIPE`) re-primes the stream with
//! `snd_pcm_prepare` and the write continues; the caller never sees it.

use alsa::pcm::{Access, Format, HwParams, State, PCM};
use alsa::{Direction, ValueOr};
use pcmout_common::{BackendKind, Config, PcmFormat, SampleWidth};
use tracing::{debug, info, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::platform::OutputBackend;
use crate::pool::{Buffer, BufferPool};

/// ALSA sample format for a supported width.
fn alsa_format(width: SampleWidth) -> Format {
    match width {
        SampleWidth::U8 => Format::U8,
        SampleWidth::S16Le => Format::S16LE,
        SampleWidth::S32Le => Format::S32LE,
    }
}

/// Negotiate hardware parameters and return the accepted sample rate.
fn configure(pcm: &PCM, format: &PcmFormat, width: SampleWidth) -> alsa::Result<u32> {
    let hwp = HwParams::any(pcm)?;
    hwp.set_access(Access::RWInterleaved)?;
    hwp.set_format(alsa_format(width))?;
    let rate = hwp.set_rate_near(format.sample_rate, ValueOr::Nearest)?;
    hwp.set_channels(format.channels as u32)?;
    pcm.hw_params(&hwp)?;
    Ok(rate)
}

/// The slice of a playback PCM that `write_frames` drives. Errors are raw
/// errno values, as ALSA reports them.
trait PcmStream {
    /// Write interleaved bytes, returning the number of frames accepted.
    fn writei(&self, data: &[u8]) -> Result<usize, i32>;
    fn prepare(&self) -> Result<(), i32>;
    fn recover(&self, errno: i32) -> Result<(), i32>;
}

impl PcmStream for PCM {
    fn writei(&self, data: &[u8]) -> Result<usize, i32> {
        self.io_bytes().writei(data).map_err(|e| e.errno())
    }

    fn prepare(&self) -> Result<(), i32> {
        PCM::prepare(self).map_err(|e| e.errno())
    }

    fn recover(&self, errno: i32) -> Result<(), i32> {
        PCM::recover(self, errno, true).map_err(|e| e.errno())
    }
}

fn errno_message(errno: i32) -> String {
    std::io::Error::from_raw_os_error(errno).to_string()
}

/// Push every frame of `data` into the driver, recovering from underruns.
fn write_frames<S: PcmStream>(
    pcm: &S,
    data: &[u8],
    bytes_per_frame: usize,
) -> DeviceResult<()> {
    let mut offset = 0;

    while offset < data.len() {
        match pcm.writei(&data[offset..]) {
            Ok(frames) => offset += frames * bytes_per_frame,
            Err(errno) if errno == libc::EPIPE => {
                warn!("[Alsa] Underrun, re-priming stream");
                pcm.prepare().map_err(|e| {
                    DeviceError::Write(format!("prepare after underrun: {}", errno_message(e)))
                })?;
            }
            Err(errno) if errno == libc::EINTR || errno == libc::EAGAIN => {}
            Err(errno) => {
                debug!(
                    "[Alsa] writei failed ({}), attempting recovery",
                    errno_message(errno)
                );
                pcm.recover(errno)
                    .map_err(|e| DeviceError::Write(errno_message(e)))?;
            }
        }
    }

    Ok(())
}

/// ALSA output backend
pub struct AlsaBackend {
    device_name: String,
    pcm: Option<PCM>,
    format: Option<PcmFormat>,
    pool: Option<BufferPool>,
}

impl AlsaBackend {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            pcm: None,
            format: None,
            pool: None,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl OutputBackend for AlsaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Alsa
    }

    fn open(&mut self, format: PcmFormat, pool: &BufferPool) -> DeviceResult<PcmFormat> {
        self.close();

        let width = format
            .sample_width()
            .ok_or(DeviceError::UnsupportedFormat(format))?;

        let pcm = PCM::new(&self.device_name, Direction::Playback, false)
            .map_err(|e| DeviceError::Acquire(format!("{}: {}", self.device_name, e)))?;

        let rate = configure(&pcm, &format, width).map_err(|e| {
            DeviceError::Configure(format!("{} ({}): {}", self.device_name, format, e))
        })?;

        PCM::prepare(&pcm)
            .map_err(|e| DeviceError::Configure(format!("prepare: {}", e)))?;

        let negotiated = format.with_sample_rate(rate);
        info!("[Alsa] Opened '{}' ({})", self.device_name, negotiated);

        self.pcm = Some(pcm);
        self.format = Some(negotiated);
        self.pool = Some(pool.clone());
        Ok(negotiated)
    }

    fn close(&mut self) {
        if let Some(pcm) = self.pcm.take() {
            drop(pcm);
            info!("[Alsa] Closed '{}'", self.device_name);
        }
        self.format = None;
        self.pool = None;
    }

    fn is_open(&self) -> bool {
        self.pcm.is_some()
    }

    fn write(&mut self, buffer: Buffer) -> DeviceResult<()> {
        let (Some(pcm), Some(format), Some(pool)) = (&self.pcm, self.format, &self.pool) else {
            warn!("[Alsa] Write on closed device; buffer {} dropped", buffer.id());
            return Err(DeviceError::NotOpen);
        };

        let result = write_frames(pcm, buffer.as_slice(), format.bytes_per_frame());
        pool.revert(buffer);
        result
    }

    fn is_drained(&self, pool: &BufferPool) -> bool {
        let running = self
            .pcm
            .as_ref()
            .map(|pcm| pcm.state() == State::Running)
            .unwrap_or(false);
        pool.data_finished() && !running
    }
}

impl Drop for AlsaBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create the ALSA backend for the configured PCM name.
pub fn create_backend(config: &Config) -> DeviceResult<Box<dyn OutputBackend>> {
    Ok(Box::new(AlsaBackend::new(config.alsa_device.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted stream: each `writei` pops the next outcome. `Ok(n)` accepts
    /// up to `n` frames, `Err(errno)` fails without consuming anything.
    struct ScriptedStream {
        bytes_per_frame: usize,
        script: RefCell<VecDeque<Result<usize, i32>>>,
        delivered: RefCell<Vec<u8>>,
        prepares: RefCell<usize>,
        recovered: RefCell<Vec<i32>>,
        recover_result: Result<(), i32>,
    }

    impl ScriptedStream {
        fn new(bytes_per_frame: usize, script: Vec<Result<usize, i32>>) -> Self {
            Self {
                bytes_per_frame,
                script: RefCell::new(script.into()),
                delivered: RefCell::new(Vec::new()),
                prepares: RefCell::new(0),
                recovered: RefCell::new(Vec::new()),
                recover_result: Ok(()),
            }
        }
    }

    impl PcmStream for ScriptedStream {
        fn writei(&self, data: &[u8]) -> Result<usize, i32> {
            let available = data.len() / self.bytes_per_frame;
            let step = self
                .script
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(available))?;
            let frames = step.min(available);
            self.delivered
                .borrow_mut()
                .extend_from_slice(&data[..frames * self.bytes_per_frame]);
            Ok(frames)
        }

        fn prepare(&self) -> Result<(), i32> {
            *self.prepares.borrow_mut() += 1;
            Ok(())
        }

        fn recover(&self, errno: i32) -> Result<(), i32> {
            self.recovered.borrow_mut().push(errno);
            self.recover_result
        }
    }

    fn frames(count: usize) -> Vec<u8> {
        (0..count * 4).map(|i| i as u8).collect()
    }

    #[test]
    fn test_underrun_mid_buffer_delivers_every_frame_once() {
        let data = frames(10);
        let stream = ScriptedStream::new(4, vec![Ok(3), Err(libc::EPIPE), Ok(4)]);

        write_frames(&stream, &data, 4).unwrap();

        assert_eq!(*stream.delivered.borrow(), data);
        assert_eq!(*stream.prepares.borrow(), 1);
        assert!(stream.recovered.borrow().is_empty());
    }

    #[test]
    fn test_interrupted_writes_are_retried() {
        let data = frames(4);
        let stream = ScriptedStream::new(4, vec![Err(libc::EINTR), Err(libc::EAGAIN), Ok(1)]);

        write_frames(&stream, &data, 4).unwrap();

        assert_eq!(*stream.delivered.borrow(), data);
        assert_eq!(*stream.prepares.borrow(), 0);
    }

    #[test]
    fn test_other_errors_go_through_recover() {
        let data = frames(2);
        let stream = ScriptedStream::new(4, vec![Err(libc::ESTRPIPE)]);

        write_frames(&stream, &data, 4).unwrap();

        assert_eq!(*stream.recovered.borrow(), vec![libc::ESTRPIPE]);
        assert_eq!(*stream.delivered.borrow(), data);
    }

    #[test]
    fn test_failed_recovery_is_a_write_error() {
        let data = frames(2);
        let mut stream = ScriptedStream::new(4, vec![Err(libc::EIO)]);
        stream.recover_result = Err(libc::EIO);

        let result = write_frames(&stream, &data, 4);

        assert!(matches!(result, Err(DeviceError::Write(_))));
        assert!(stream.delivered.borrow().is_empty());
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(alsa_format(SampleWidth::U8), Format::U8);
        assert_eq!(alsa_format(SampleWidth::S16Le), Format::S16LE);
        assert_eq!(alsa_format(SampleWidth::S32Le), Format::S32LE);
    }

    #[test]
    fn test_missing_device_fails_cleanly() {
        let pool = BufferPool::new(1, 64);
        let mut backend = AlsaBackend::new("pcmout_no_such_device");
        let result = backend.open(PcmFormat::cd_quality(), &pool);
        assert!(matches!(result, Err(DeviceError::Acquire(_))));
        assert!(!backend.is_open());
        backend.close();
    }

    #[test]
    fn test_unsupported_width_rejected_before_driver() {
        let pool = BufferPool::new(1, 64);
        let mut backend = AlsaBackend::new("default");
        let result = backend.open(PcmFormat::new(2, 44100, 24), &pool);
        assert!(matches!(result, Err(DeviceError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_create_backend_uses_configured_name() {
        let config = Config {
            alsa_device: "plughw:0,0".to_string(),
            ..Default::default()
        };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.kind(), BackendKind::Alsa);
        assert!(!backend.is_open());
    }
}
