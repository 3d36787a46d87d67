//! Platform-specific logging directory resolution.

use std::path::PathBuf;

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/pcmout/logs` or `~/.local/state/pcmout/logs` |
/// | macOS | `~/Library/Logs/pcmout` |
/// | Windows | `%LOCALAPPDATA%/pcmout/logs` |
///
/// Falls back to a directory under the system temp dir when no home
/// directory can be determined.
pub fn log_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        match directories::ProjectDirs::from("io", "pcmout", "pcmout") {
            Some(base) => base
                .state_dir()
                .map(|d| d.to_path_buf())
                .unwrap_or_else(|| base.data_local_dir().join("state"))
                .join("logs"),
            None => fallback_log_dir(),
        }
    }

    #[cfg(target_os = "macos")]
    {
        match dirs::home_dir() {
            Some(home) => home.join("Library").join("Logs").join("pcmout"),
            None => fallback_log_dir(),
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        match directories::ProjectDirs::from("io", "pcmout", "pcmout") {
            Some(base) => base.data_local_dir().join("logs"),
            None => fallback_log_dir(),
        }
    }
}

fn fallback_log_dir() -> PathBuf {
    std::env::temp_dir().join("pcmout-logs")
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<(), std::io::Error> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(())
}

/// File name prefix used by the rolling log appender.
pub const LOG_FILE_PREFIX: &str = "pcmout";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_named_for_the_app() {
        let dir = log_dir();
        assert!(dir.is_absolute());
        assert!(dir.to_string_lossy().contains("pcmout"));
    }
}
