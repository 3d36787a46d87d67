//! Default device discovery from `/dev/sndstat`
//!
//! FreeBSD style sndstat lists one line per PCM unit:
//!
//! ```text
//! Installed devices:
//! pcm0: <Realtek ALC892 (Analog)> (play/rec) default
//! pcm1: <Realtek ALC892 (Rear Digital)> (play)
//! ```
//!
//! The unit marked `default` that can play maps to `/dev/dspN`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

pub const SNDSTAT_PATH: &str = "/dev/sndstat";
pub const FALLBACK_DEVICE: &str = "/dev/dsp";

/// Parse sndstat text and return the default playback device path.
pub fn default_device(sndstat: &str) -> Option<PathBuf> {
    sndstat.lines().find_map(parse_line)
}

fn parse_line(line: &str) -> Option<PathBuf> {
    let line = line.trim();
    let rest = line.strip_prefix("pcm")?;
    let (unit, _) = rest.split_once(':')?;
    if unit.is_empty() || !unit.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // The description in <...> may itself contain the flag words
    let flags = match line.rfind('>') {
        Some(pos) => &line[pos + 1..],
        None => &line[line.find(':')? + 1..],
    };
    if !flags.contains("play") {
        return None;
    }
    let is_default = flags
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == "default");
    if !is_default {
        return None;
    }

    Some(PathBuf::from(format!("/dev/dsp{}", unit)))
}

/// Resolve the OSS device path from `sndstat_path`, falling back to `/dev/dsp`.
pub fn discover_from(sndstat_path: &Path) -> PathBuf {
    match fs::read_to_string(sndstat_path) {
        Ok(text) => match default_device(&text) {
            Some(path) => {
                debug!("[Oss] sndstat default device: {}", path.display());
                path
            }
            None => {
                debug!("[Oss] No default playback unit in sndstat");
                PathBuf::from(FALLBACK_DEVICE)
            }
        },
        Err(e) => {
            debug!("[Oss] Cannot read {}: {}", sndstat_path.display(), e);
            PathBuf::from(FALLBACK_DEVICE)
        }
    }
}

/// Resolve the system's default OSS playback device.
pub fn discover() -> PathBuf {
    discover_from(Path::new(SNDSTAT_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREEBSD: &str = "\
FreeBSD Audio Driver (64bit 2009061500/amd64)
Installed devices:
pcm0: <Realtek ALC892 (Analog 2.0+HP/2.0)> (play/rec)
pcm1: <Realtek ALC892 (Rear Digital)> (play)
pcm2: <USB audio> (play/rec) default
";

    #[test]
    fn test_picks_default_unit() {
        assert_eq!(default_device(FREEBSD), Some(PathBuf::from("/dev/dsp2")));
    }

    #[test]
    fn test_ignores_default_inside_description() {
        let text = "pcm0: <default card> (play)\npcm1: <other> (play) default\n";
        assert_eq!(default_device(text), Some(PathBuf::from("/dev/dsp1")));
    }

    #[test]
    fn test_record_only_default_is_skipped() {
        let text = "pcm0: <mic array> (rec) default\npcm1: <speakers> (play)\n";
        assert_eq!(default_device(text), None);
    }

    #[test]
    fn test_no_default_marker() {
        let text = "Installed devices:\npcm0: <hda> (play/rec)\n";
        assert_eq!(default_device(text), None);
    }

    #[test]
    fn test_malformed_lines_ignored() {
        let text = "pcm: <x> (play) default\npcmX: <y> (play) default\nnothing here\n";
        assert_eq!(default_device(text), None);
    }

    #[test]
    fn test_discover_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("sndstat");
        assert_eq!(discover_from(&missing), PathBuf::from(FALLBACK_DEVICE));

        fs::write(&missing, "pcm0: <hda> (play/rec)\n").unwrap();
        assert_eq!(discover_from(&missing), PathBuf::from(FALLBACK_DEVICE));

        fs::write(&missing, "pcm3: <hda> (play/rec) default\n").unwrap();
        assert_eq!(discover_from(&missing), PathBuf::from("/dev/dsp3"));
    }
}
