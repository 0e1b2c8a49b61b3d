//! Command runners for the `diskplay` binary.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use disk_player::config::PlayerConfig;
use disk_player::decode::SymphoniaSource;
use disk_player::host::cpal_host::{self, CpalHost};
use disk_player::session::{self, EndReason, PlaybackReport, SessionControls};
use disk_player::source::StreamSource;
use disk_player::state::{StopHandle, format_elapsed};

use crate::cli::Args;
use crate::config::{normalize_device_name, player_config};
use crate::rc::RcConfig;
use crate::supervise::{FileFeed, RemoteFeed, supervise};

/// Client name used as the prefix of every output port.
const CLIENT_NAME: &str = "diskplay";

/// Where fetched configs are written when `--rc` is not given.
const DEFAULT_RC_FILE: &str = "diskplayrc";

/// Print output devices to stdout.
pub fn list_devices() -> Result<()> {
    let names = cpal_host::list_output_devices().context("enumerate output devices")?;
    for (i, name) in names.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Play the file named on the command line until it finishes or Ctrl-C is pressed.
pub fn run_play(args: &Args) -> Result<PlaybackReport> {
    let path = args.path.as_deref().context("no input file given")?;
    let config = player_config(args);
    config.validate()?;

    let stop = StopHandle::for_current_thread();
    let for_signal = stop.clone();
    ctrlc::set_handler(move || {
        if for_signal.is_requested() {
            std::process::exit(130);
        }
        tracing::info!("stopping (press Ctrl-C again to quit immediately)");
        for_signal.request();
    })
    .context("install Ctrl-C handler")?;

    let report = play_file(path, &config, args.device.clone(), stop)?;
    if report.end == EndReason::HostShutdown {
        tracing::warn!("output device went away during playback");
    }
    Ok(report)
}

/// Keep playing the rc file's `input_file`, restarting whenever the config changes.
///
/// Configs come from `--config-host` when given, otherwise from the `--rc` file.
pub fn run_supervised(args: &Args, on_verbosity: impl FnMut(u8)) -> Result<u32> {
    let mut config = player_config(args);
    // Nobody is at the terminal to press Enter on every restart.
    config.wait_before_play = false;
    config.validate()?;

    let shutdown = StopHandle::for_current_thread();
    let for_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        if for_signal.is_requested() {
            std::process::exit(130);
        }
        tracing::info!("shutting down (press Ctrl-C again to quit immediately)");
        for_signal.request();
    })
    .context("install Ctrl-C handler")?;

    let device = args.device.clone();
    let launch = move |rc: &RcConfig, stop: StopHandle| {
        match play_file(&rc.input_file, &config, device.clone(), stop) {
            Ok(report) => tracing::info!(
                end = ?report.end,
                frames = report.frames_played,
                loops = report.loops_completed,
                "playback ended"
            ),
            Err(e) => tracing::error!("playback of {} failed: {e:#}", rc.input_file.display()),
        }
    };

    let default_poll = Duration::try_from_secs_f64(args.poll_interval_secs)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(Duration::from_secs(5));
    match (&args.config_host, &args.mac_addr) {
        (Some(host), Some(mac)) => {
            let rc_path = args.rc.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_RC_FILE));
            let feed = RemoteFeed::new(host, mac, rc_path);
            supervise(feed, launch, default_poll, &shutdown, on_verbosity)
        }
        _ => {
            let rc_path = args.rc.clone().context("no rc file given")?;
            supervise(FileFeed::new(rc_path), launch, default_poll, &shutdown, on_verbosity)
        }
    }
}

/// Open `path` and the output device and play until the session ends or `stop` fires.
///
/// `stop` must belong to the calling thread.
fn play_file(
    path: &Path,
    config: &PlayerConfig,
    device: Option<String>,
    stop: StopHandle,
) -> Result<PlaybackReport> {
    let source = SymphoniaSource::open(path)?;
    let info = source.info().clone();
    tracing::info!(
        path = %source.path().display(),
        channels = source.channels(),
        rate_hz = source.sample_rate(),
        duration = %info.duration_ms.map(format_elapsed).unwrap_or_else(|| "unknown".into()),
        loops = %config.loop_count,
        codec = info.codec.as_deref().unwrap_or("unknown"),
        bits = ?info.bit_depth,
        "source"
    );

    let device = normalize_device_name(device);
    let max_period = u32::try_from((config.buffer_frames / 4).max(1)).unwrap_or(u32::MAX);
    let mut host = CpalHost::open(CLIENT_NAME, device.as_deref(), source.sample_rate(), max_period)
        .context("open output device")?;

    let mut controls = SessionControls::new(stop);
    if config.wait_before_play {
        controls = controls.with_start_gate(wait_for_enter);
    }

    let report = session::play(&mut host, source, config, controls).context("playback")?;
    Ok(report)
}

fn wait_for_enter() -> io::Result<()> {
    eprintln!("press Enter to start playback");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}
