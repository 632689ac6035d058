use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod channel;
mod config;
mod dsp;
mod fits;
mod input;
mod ring;
mod snapshot;
mod stream;
mod time;
mod waterfall;

use config::Config;
use input::{LiveFrontend, WavStream};
use snapshot::SnapshotRecorder;
use waterfall::WaterfallCore;

#[derive(Parser)]
#[command(name = "waterfall")]
#[command(version, about = "Radio waterfall recorder: baseband I/Q in, FITS spectrogram tiles out", long_about = None)]
struct Cli {
    /// WAV file to process; captures live audio when omitted
    input: Option<PathBuf>,

    /// Config file path (default: the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool, config_level: &str) {
    // Priority: RUST_LOG env > --verbose flag > config file > default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { config_level };
        EnvFilter::new(format!("waterfall={level}"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_logging(cli.verbose, &config.log_level);
    info!(
        "waterfall {}: {} bins, {} overlap, origin \"{}\"",
        env!("CARGO_PKG_VERSION"),
        config.fft_bins,
        config.fft_overlap,
        config.location_name
    );

    let mut core =
        WaterfallCore::new(config.core_config()).context("failed to set up the FFT pipeline")?;
    core.add_recorder(Box::new(SnapshotRecorder::new(
        config.waterfall_snapshot_length,
        config.waterfall_left_freq,
        config.waterfall_right_freq,
    )));

    // SIGINT asks the frontend to stop; the frontend then closes the stream
    // and recorders flush their current tile before the process exits.
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_token = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_token.store(true, Ordering::SeqCst);
    })
    .context("failed to install the interrupt handler")?;

    match cli.input {
        Some(path) => {
            WavStream::new(path)
                .run(&mut core, &cancel)
                .context("WAV stream failed")?;
        }
        None => {
            LiveFrontend::new(config.audio_device.clone())
                .run(core, cancel)
                .context("live capture failed")?;
        }
    }

    Ok(())
}
