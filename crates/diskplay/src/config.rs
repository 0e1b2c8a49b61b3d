//! Maps command-line arguments onto the player configuration.

use std::time::Duration;

use disk_player::config::{LoopCount, PlayerConfig};

use crate::cli::Args;

pub fn player_config(args: &Args) -> PlayerConfig {
    PlayerConfig {
        loop_count: LoopCount::from_count(args.loop_count),
        buffer_frames: args.buffer_frames,
        chunk_frames: args.chunk_frames,
        connect_pattern: (!args.no_connect).then(|| args.connect.clone()),
        wait_before_play: args.wait,
        status_interval: Duration::from_millis(args.status_interval_ms.max(1)),
    }
}

/// Trim a device selector; blank means the default device.
pub fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
