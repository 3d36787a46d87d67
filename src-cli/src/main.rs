//! pcmout Command Line Interface
//!
//! Plays WAV files and test tones through the native PCM output backend
//! and manages the persisted configuration.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use pcmout_common::config::CONFIG_KEYS;
use pcmout_common::{logging, runtime_mode, RuntimeMode};
use pcmout_engine::config::{load_config, save_config, Config};
use pcmout_engine::{
    create_backend, native_backend_kind, BackendKind, OutputBackend, PcmFormat, PcmSource,
    PlaybackStats, Player, PlayerSettings, SimulatedBackend, ToneSource, WavSource,
};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pcmout")]
#[command(version)]
#[command(about = "Cross-platform PCM audio output", long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Increase verbosity
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to a rotating file in the log directory instead of stderr
    #[arg(long)]
    log_file: bool,

    /// Play through the simulated device instead of the sound card
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Play an integer PCM WAV file
    Play {
        /// Path to the WAV file
        file: PathBuf,
    },

    /// Play a sine test tone
    Tone {
        /// Tone frequency in Hz
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f32,

        /// Length in seconds
        #[arg(short, long, default_value_t = 2.0)]
        seconds: f32,

        /// Channel count
        #[arg(short, long, default_value_t = 2)]
        channels: u16,

        /// Sample rate in Hz
        #[arg(short, long, default_value_t = 44100)]
        rate: u32,

        /// Bits per sample (8, 16 or 32)
        #[arg(short, long, default_value_t = 16)]
        bits: u16,

        /// Peak level, 0.0 to 1.0
        #[arg(short, long, default_value_t = 0.5)]
        amplitude: f32,
    },

    /// Show the compiled backend and file locations
    Info,

    /// View or modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all configuration values
    Show,

    /// Get a single configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// New value
        value: String,
    },

    /// Print the configuration file path
    Path,
}

/// Error with an associated exit code.
struct CliError {
    message: String,
    exit_code: i32,
}

impl CliError {
    fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self::new(message, 1)
    }

    fn usage(message: impl Into<String>) -> Self {
        Self::new(message, 64)
    }
}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        Self::general(message)
    }
}

impl From<pcmout_engine::DeviceError> for CliError {
    fn from(e: pcmout_engine::DeviceError) -> Self {
        Self::general(e.to_string())
    }
}

fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.message);
        std::process::exit(e.exit_code);
    }
}

/// Install the tracing subscriber.
///
/// Logs go to stderr unless `--log-file` is given, in which case they go to a
/// daily-rotating file. The returned guard flushes that file on drop.
fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let default_level = if cli.verbose || runtime_mode() == RuntimeMode::Development {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if !cli.log_file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    }

    if let Err(e) = logging::ensure_log_dir() {
        eprintln!("Warning: Failed to create log directory: {}", e);
    }

    let build = |dir: &std::path::Path| {
        tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .max_log_files(5)
            .filename_prefix(logging::LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir)
    };

    let appender = match build(&logging::log_dir()) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Failed to create log file appender: {}", e);
            let temp_dir = std::env::temp_dir().join("pcmout-logs");
            let _ = std::fs::create_dir_all(&temp_dir);
            match build(&temp_dir) {
                Ok(appender) => appender,
                Err(e) => {
                    eprintln!("Warning: Logging disabled: {}", e);
                    return None;
                }
            }
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    debug!("File logging initialized in {:?}", logging::log_dir());
    Some(guard)
}

fn run(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Commands::Play { file } => {
            let source = WavSource::open(file)?;
            play(&cli, Box::new(source))
        }
        Commands::Tone {
            frequency,
            seconds,
            channels,
            rate,
            bits,
            amplitude,
        } => {
            let format = PcmFormat::new(*channels, *rate, *bits);
            let source = tone_source(format, *frequency, *seconds, *amplitude)?;
            play(&cli, Box::new(source))
        }
        Commands::Info => handle_info(&cli),
        Commands::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&cli),
            ConfigAction::Get { key } => handle_config_get(key, &cli),
            ConfigAction::Set { key, value } => handle_config_set(key, value, &cli),
            ConfigAction::Path => {
                println!("{}", Config::config_path().display());
                Ok(())
            }
        },
        Commands::Version => {
            if matches!(cli.format, OutputFormat::Json) {
                println!(
                    "{}",
                    serde_json::json!({ "version": env!("CARGO_PKG_VERSION") })
                );
            } else {
                println!("pcmout {}", env!("CARGO_PKG_VERSION"));
            }
            Ok(())
        }
    }
}

fn output_backend(cli: &Cli, config: &Config) -> Result<Box<dyn OutputBackend>, CliError> {
    if cli.simulate {
        info!("Using simulated output device");
        return Ok(Box::new(SimulatedBackend::realtime()));
    }
    Ok(create_backend(config)?)
}

/// Play `source` to the end, or until Ctrl+C.
fn play(cli: &Cli, source: Box<dyn PcmSource>) -> Result<(), CliError> {
    let config = load_config();
    let backend = output_backend(cli, &config)?;
    let backend_name = backend.name();
    let player = Player::new(PlayerSettings::from(&config));

    let stop = player.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }

    if !cli.quiet && matches!(cli.format, OutputFormat::Text) {
        println!(
            "Playing {} via {}...",
            source.format().to_string().cyan(),
            backend_name
        );
    }

    let stats = player.play(backend, source)?;
    print_stats(cli, backend_name, &stats)
}

fn print_stats(cli: &Cli, backend: &str, stats: &PlaybackStats) -> Result<(), CliError> {
    if matches!(cli.format, OutputFormat::Json) {
        let mut value = serde_json::to_value(stats).map_err(|e| e.to_string())?;
        value["backend"] = serde_json::Value::from(backend);
        println!(
            "{}",
            serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?
        );
        return Ok(());
    }

    if cli.quiet {
        return Ok(());
    }

    let status = if stats.stopped {
        "Stopped".yellow()
    } else {
        "Done".green()
    };
    println!(
        "{}: {} buffer(s), {} bytes, {:.2}s of audio as {} ({:.2}s elapsed)",
        status,
        stats.buffers,
        stats.bytes,
        stats.audio_duration().as_secs_f64(),
        stats.format,
        stats.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Build the `tone` source, rejecting lengths a `Duration` cannot hold.
fn tone_source(
    format: PcmFormat,
    frequency: f32,
    seconds: f32,
    amplitude: f32,
) -> Result<ToneSource, CliError> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(CliError::usage("--seconds must be a positive number"));
    }
    if !(0.0..=1.0).contains(&amplitude) {
        return Err(CliError::usage("--amplitude must be between 0.0 and 1.0"));
    }
    let duration = Duration::try_from_secs_f32(seconds)
        .map_err(|e| CliError::usage(format!("--seconds {}: {}", seconds, e)))?;
    let source = ToneSource::new(format, frequency, duration)
        .map_err(|e| CliError::usage(e.to_string()))?;
    Ok(source.with_amplitude(amplitude))
}

/// Handle `info` -- show build and environment details.
fn handle_info(cli: &Cli) -> Result<(), CliError> {
    let kind = if cli.simulate {
        Some(BackendKind::Simulated)
    } else {
        native_backend_kind()
    };
    let backend = kind.map(|k| k.as_str()).unwrap_or("none");
    let asynchronous = kind.map(|k| k.is_asynchronous()).unwrap_or(false);
    let config_path = Config::config_path();
    let log_dir = logging::log_dir();
    let mode = runtime_mode();

    if matches!(cli.format, OutputFormat::Json) {
        let value = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": backend,
            "simulate": cli.simulate,
            "asynchronous": asynchronous,
            "runtime_mode": mode.as_str(),
            "config_path": config_path,
            "log_dir": log_dir,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?
        );
    } else {
        println!("{}: {}", "version".bold(), env!("CARGO_PKG_VERSION"));
        println!("{}: {}", "backend".bold(), backend);
        if cli.simulate {
            println!("{}: {}", "output".bold(), "simulated".yellow());
        }
        println!("{}: {}", "asynchronous".bold(), asynchronous);
        println!("{}: {}", "runtime_mode".bold(), mode.as_str());
        println!("{}: {}", "config_path".bold(), config_path.display());
        println!("{}: {}", "log_dir".bold(), log_dir.display());
    }

    Ok(())
}

/// Validate that a config key name is recognized.
fn validate_config_key(key: &str) -> Result<(), CliError> {
    if CONFIG_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(CliError::usage(format!(
            "Unknown configuration key '{}'. Valid keys: {}",
            key,
            CONFIG_KEYS.join(", ")
        )))
    }
}

/// Handle `config show` -- display all config values.
fn handle_config_show(cli: &Cli) -> Result<(), CliError> {
    let config = load_config();

    if matches!(cli.format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?
        );
    } else {
        for key in CONFIG_KEYS {
            if let Some(value) = config.get_value(key) {
                println!("{}: {}", key.bold(), value);
            }
        }
    }

    Ok(())
}

/// Handle `config get <key>` -- display a single config value.
fn handle_config_get(key: &str, cli: &Cli) -> Result<(), CliError> {
    validate_config_key(key)?;
    let config = load_config();

    if matches!(cli.format, OutputFormat::Json) {
        let all = serde_json::to_value(&config).map_err(|e| e.to_string())?;
        println!("{}", all[key]);
    } else if let Some(value) = config.get_value(key) {
        println!("{}", value);
    }

    Ok(())
}

/// Handle `config set <key> <value>` -- update a config value.
fn handle_config_set(key: &str, value: &str, cli: &Cli) -> Result<(), CliError> {
    validate_config_key(key)?;

    let mut config = load_config();
    config.set_value(key, value).map_err(CliError::usage)?;
    save_config(&config)
        .map_err(|e| CliError::general(format!("Failed to save config: {}", e)))?;

    if !cli.quiet {
        let shown = config.get_value(key).unwrap_or_default();
        println!("{} {} = {}", "Set".green(), key, shown);
    }
    Ok(())
}
