use std::path::PathBuf;

use clap::Parser;
use disk_player::config::{DEFAULT_BUFFER_FRAMES, DEFAULT_CONNECT_PATTERN};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

/// Stream an audio file from disk to the output device.
#[derive(Parser, Debug, Clone)]
#[command(name = "diskplay", version = VERSION)]
pub struct Args {
    /// Path to the audio file
    #[arg(required_unless_present_any = ["list_devices", "rc", "config_host"])]
    pub path: Option<PathBuf>,

    /// Number of passes through the file; values below 1 loop until interrupted
    #[arg(short = 'l', long, default_value_t = 1, allow_negative_numbers = true)]
    pub loop_count: i64,

    /// Ring buffer capacity in frames
    #[arg(long, default_value_t = DEFAULT_BUFFER_FRAMES)]
    pub buffer_frames: usize,

    /// Frames decoded per disk read
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Auto-connect pattern for output ports; %d is the 1-based channel number
    #[arg(long, default_value = DEFAULT_CONNECT_PATTERN)]
    pub connect: String,

    /// Leave output ports unconnected
    #[arg(long, conflicts_with = "connect")]
    pub no_connect: bool,

    /// Wait for Enter before playback starts
    #[arg(short, long)]
    pub wait: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Status line interval in milliseconds (logged at debug level)
    #[arg(long, default_value_t = 1000)]
    pub status_interval_ms: u64,

    /// Run-control file. Alone, it is watched and playback restarts when it changes;
    /// with --config-host, fetched configs are written to it
    #[arg(long, conflicts_with = "path")]
    pub rc: Option<PathBuf>,

    /// Config server (`host[:port]`) polled with `POST /config`
    #[arg(short = 'H', long, requires = "mac_addr", conflicts_with = "path")]
    pub config_host: Option<String>,

    /// MAC address identifying this device to the config server
    #[arg(short = 'M', long, requires = "config_host")]
    pub mac_addr: Option<String>,

    /// Seconds between config polls when the config does not set `poll_interval`
    #[arg(long, default_value_t = 5.0)]
    pub poll_interval_secs: f64,
}
