//! diskplay: streams an audio file from disk to an output device.
//!
//! A disk thread decodes the file with Symphonia into a lock-free ring buffer; the CPAL
//! output callback drains it without blocking. The file can be looped a fixed number of
//! times or forever. With `--rc` or `--config-host` the file to play comes from a
//! run-control config, and playback restarts whenever that config changes.

mod cli;
mod config;
mod rc;
mod runtime;
mod supervise;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,diskplay=info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    if args.rc.is_some() || args.config_host.is_some() {
        let launches = runtime::run_supervised(&args, |verbosity| {
            let directive = supervise::verbosity_filter(verbosity);
            if let Err(e) = filter_handle.reload(EnvFilter::new(directive)) {
                tracing::warn!("cannot apply verbosity {verbosity}: {e}");
            }
        })?;
        tracing::info!(launches, "supervisor stopped");
        return Ok(());
    }

    let report = runtime::run_play(&args)?;
    tracing::info!(
        frames = report.frames_played,
        loops = report.loops_completed,
        underrun_events = report.underrun_events,
        underrun_frames = report.underrun_frames,
        "done"
    );
    Ok(())
}
