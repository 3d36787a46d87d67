//! OSS sound-device file backend
//!
//! Configures `/dev/dsp*` with the classic `SNDCTL_DSP_*` ioctls and writes
//! PCM with blocking `write(2)`. The driver may adjust the rate; it may not
//! change sample format or channel count.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use pcmout_common::{BackendKind, Config, PcmFormat, SampleWidth};
use tracing::{debug, info, warn};

use super::sndstat;
use crate::error::{DeviceError, DeviceResult};
use crate::platform::OutputBackend;
use crate::pool::{Buffer, BufferPool};

// ioctl direction bits. Linux and the BSDs both build request numbers as
// dir | size << 16 | group << 8 | nr, but assign the bits differently.
#[cfg(target_os = "linux")]
mod ioc {
    pub const NONE: u32 = 0x0000_0000;
    pub const WRITE: u32 = 0x4000_0000;
    pub const READ: u32 = 0x8000_0000;
}

#[cfg(not(target_os = "linux"))]
mod ioc {
    pub const NONE: u32 = 0x2000_0000;
    pub const WRITE: u32 = 0x8000_0000;
    pub const READ: u32 = 0x4000_0000;
}

const INT_SIZE: u32 = std::mem::size_of::<libc::c_int>() as u32;

const fn request(dir: u32, nr: u32, size: u32) -> u32 {
    dir | ((size & 0x1FFF) << 16) | ((b'P' as u32) << 8) | nr
}

const fn io(nr: u32) -> u32 {
    request(ioc::NONE, nr, 0)
}

const fn ior(nr: u32) -> u32 {
    request(ioc::READ, nr, INT_SIZE)
}

const fn iow(nr: u32) -> u32 {
    request(ioc::WRITE, nr, INT_SIZE)
}

const fn iowr(nr: u32) -> u32 {
    request(ioc::READ | ioc::WRITE, nr, INT_SIZE)
}

// <sys/soundcard.h> requests
const SNDCTL_DSP_RESET: u32 = io(0);
const SNDCTL_DSP_SYNC: u32 = io(1);
const SNDCTL_DSP_SPEED: u32 = iowr(2);
const SNDCTL_DSP_SETFMT: u32 = iowr(5);
const SNDCTL_DSP_CHANNELS: u32 = iowr(6);
const SNDCTL_DSP_SETFRAGMENT: u32 = iowr(10);
const SNDCTL_DSP_GETODELAY: u32 = ior(23);
const SNDCTL_DSP_COOKEDMODE: u32 = iow(30);

const AFMT_U8: libc::c_int = 0x0000_0008;
const AFMT_S16_LE: libc::c_int = 0x0000_0010;
const AFMT_S32_LE: libc::c_int = 0x0000_1000;

fn afmt(width: SampleWidth) -> libc::c_int {
    match width {
        SampleWidth::U8 => AFMT_U8,
        SampleWidth::S16Le => AFMT_S16_LE,
        SampleWidth::S32Le => AFMT_S32_LE,
    }
}

/// Issue an ioctl carrying an int in/out argument.
fn ioctl_int(file: &File, request: u32, value: libc::c_int) -> io::Result<libc::c_int> {
    let mut arg = value;
    // SAFETY: fd is a live descriptor owned by `file`; arg outlives the call.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            request as _,
            &mut arg as *mut libc::c_int,
        )
    };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(arg)
    }
}

/// Issue an ioctl without an argument.
fn ioctl_none(file: &File, request: u32) -> io::Result<()> {
    // SAFETY: fd is a live descriptor owned by `file`.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request as _, 0) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// OSS output backend
pub struct OssBackend {
    configured_path: Option<PathBuf>,
    fragment: u32,
    file: Option<File>,
    path: Option<PathBuf>,
    pool: Option<BufferPool>,
}

impl OssBackend {
    /// `path` of `None` discovers the default unit through `/dev/sndstat`.
    pub fn new(path: Option<PathBuf>, fragment: u32) -> Self {
        Self {
            configured_path: path,
            fragment,
            file: None,
            path: None,
            pool: None,
        }
    }

    /// Device path currently open, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn configure(
        &self,
        file: &File,
        format: &PcmFormat,
        width: SampleWidth,
    ) -> DeviceResult<PcmFormat> {
        // Cooked mode off: the readbacks below must describe the hardware,
        // not an in-kernel converter. Not every implementation knows it.
        if let Err(e) = ioctl_int(file, SNDCTL_DSP_COOKEDMODE, 0) {
            debug!("[Oss] COOKEDMODE not supported: {}", e);
        }

        if self.fragment != 0 {
            let fragment = self.fragment as libc::c_int;
            if let Err(e) = ioctl_int(file, SNDCTL_DSP_SETFRAGMENT, fragment) {
                warn!("[Oss] SETFRAGMENT {:#010x} failed: {}", self.fragment, e);
            }
        }

        let wanted = afmt(width);
        let got = ioctl_int(file, SNDCTL_DSP_SETFMT, wanted)
            .map_err(|e| DeviceError::Configure(format!("SETFMT: {}", e)))?;
        if got != wanted {
            debug!("[Oss] Driver offered format {:#x} instead of {:#x}", got, wanted);
            return Err(DeviceError::UnsupportedFormat(*format));
        }

        let channels = ioctl_int(file, SNDCTL_DSP_CHANNELS, format.channels as libc::c_int)
            .map_err(|e| DeviceError::Configure(format!("CHANNELS: {}", e)))?;
        if channels != format.channels as libc::c_int {
            return Err(DeviceError::Configure(format!(
                "driver set {} channels, {} requested",
                channels, format.channels
            )));
        }

        let rate = ioctl_int(file, SNDCTL_DSP_SPEED, format.sample_rate as libc::c_int)
            .map_err(|e| DeviceError::Configure(format!("SPEED: {}", e)))?;
        if rate <= 0 {
            return Err(DeviceError::Configure(format!("driver reported rate {}", rate)));
        }

        Ok(format.with_sample_rate(rate as u32))
    }

    /// Bytes the driver still holds for playback.
    fn output_delay(&self) -> Option<i32> {
        let file = self.file.as_ref()?;
        ioctl_int(file, SNDCTL_DSP_GETODELAY, 0).ok()
    }
}

impl OutputBackend for OssBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Oss
    }

    fn open(&mut self, format: PcmFormat, pool: &BufferPool) -> DeviceResult<PcmFormat> {
        self.close();

        let width = format
            .sample_width()
            .ok_or(DeviceError::UnsupportedFormat(format))?;

        let path = self.configured_path.clone().unwrap_or_else(sndstat::discover);
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| DeviceError::Acquire(format!("{}: {}", path.display(), e)))?;

        let negotiated = self.configure(&file, &format, width)?;
        info!("[Oss] Opened {} ({})", path.display(), negotiated);

        self.file = Some(file);
        self.path = Some(path);
        self.pool = Some(pool.clone());
        Ok(negotiated)
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = ioctl_none(&file, SNDCTL_DSP_RESET) {
                debug!("[Oss] RESET on close failed: {}", e);
            }
            drop(file);
            if let Some(path) = self.path.take() {
                info!("[Oss] Closed {}", path.display());
            }
        }
        self.pool = None;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn write(&mut self, buffer: Buffer) -> DeviceResult<()> {
        let (Some(file), Some(pool)) = (self.file.as_mut(), self.pool.as_ref()) else {
            warn!("[Oss] Write on closed device; buffer {} dropped", buffer.id());
            return Err(DeviceError::NotOpen);
        };

        let result = file
            .write_all(buffer.as_slice())
            .map_err(|e| DeviceError::Write(e.to_string()));
        if result.is_ok() {
            debug!("[Oss] Buffer {} written ({} bytes)", buffer.id(), buffer.len());
        }
        pool.revert(buffer);
        result
    }

    fn is_drained(&self, pool: &BufferPool) -> bool {
        if !pool.data_finished() {
            return false;
        }
        match self.output_delay() {
            Some(delay) => delay <= 0,
            // No GETODELAY: block on SYNC once and call it drained
            None => {
                if let Some(file) = self.file.as_ref() {
                    let _ = ioctl_none(file, SNDCTL_DSP_SYNC);
                }
                true
            }
        }
    }
}

impl Drop for OssBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create the OSS backend from the configured device path and fragment.
pub fn create_backend(config: &Config) -> DeviceResult<Box<dyn OutputBackend>> {
    Ok(Box::new(OssBackend::new(
        config.oss_device.clone(),
        config.oss_fragment,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_afmt_values() {
        assert_eq!(afmt(SampleWidth::U8), 0x08);
        assert_eq!(afmt(SampleWidth::S16Le), 0x10);
        assert_eq!(afmt(SampleWidth::S32Le), 0x1000);
    }

    #[test]
    fn test_portable_request_numbers() {
        assert_eq!(SNDCTL_DSP_SPEED, 0xC004_5002);
        assert_eq!(SNDCTL_DSP_SETFMT, 0xC004_5005);
        assert_eq!(SNDCTL_DSP_CHANNELS, 0xC004_5006);
        assert_eq!(SNDCTL_DSP_SETFRAGMENT, 0xC004_500A);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_request_numbers() {
        assert_eq!(SNDCTL_DSP_RESET, 0x0000_5000);
        assert_eq!(SNDCTL_DSP_SYNC, 0x0000_5001);
        assert_eq!(SNDCTL_DSP_GETODELAY, 0x8004_5017);
        assert_eq!(SNDCTL_DSP_COOKEDMODE, 0x4004_501E);
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn test_bsd_request_numbers() {
        assert_eq!(SNDCTL_DSP_RESET, 0x2000_5000);
        assert_eq!(SNDCTL_DSP_SYNC, 0x2000_5001);
        assert_eq!(SNDCTL_DSP_GETODELAY, 0x4004_5017);
        assert_eq!(SNDCTL_DSP_COOKEDMODE, 0x8004_501E);
    }

    #[test]
    fn test_missing_device_fails_cleanly() {
        let pool = BufferPool::new(1, 64);
        let mut backend = OssBackend::new(Some(PathBuf::from("/nonexistent/dsp9")), 0);
        let result = backend.open(PcmFormat::cd_quality(), &pool);
        assert!(matches!(result, Err(DeviceError::Acquire(_))));
        assert!(!backend.is_open());
        assert!(backend.path().is_none());
    }

    #[test]
    fn test_regular_file_is_not_a_sound_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let pool = BufferPool::new(1, 64);
        let mut backend = OssBackend::new(Some(file.path().to_path_buf()), 0);
        // Plain files reject the format ioctls
        let result = backend.open(PcmFormat::cd_quality(), &pool);
        assert!(matches!(result, Err(DeviceError::Configure(_))));
        assert!(!backend.is_open());
    }

    #[test]
    fn test_write_when_closed() {
        let pool = BufferPool::new(1, 64);
        let mut backend = OssBackend::new(None, 0);
        let buffer = pool.acquire();
        assert!(matches!(backend.write(buffer), Err(DeviceError::NotOpen)));
    }
}
