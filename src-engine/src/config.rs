//! Configuration persistence for the output engine.
//!
//! This module re-exports the shared Config from pcmout-common and adds
//! engine-side logging via tracing.

pub use pcmout_common::config::Config;

use tracing::{debug, info};

/// Load configuration with tracing output.
pub fn load_config() -> Config {
    let path = Config::config_path();
    let config = Config::load();
    info!("Loaded config from {:?}", path);
    debug!(
        "Config: alsa_device={}, buffers={}x{}ms, drain_poll={}ms",
        config.alsa_device, config.buffer_count, config.buffer_ms, config.drain_poll_ms
    );
    config
}

/// Save configuration with tracing output.
pub fn save_config(config: &Config) -> std::io::Result<()> {
    let path = Config::config_path();
    config.save()?;
    info!("Saved config to {:?}", path);
    Ok(())
}
