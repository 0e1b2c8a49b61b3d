use std::fmt;
use std::time::Duration;

use crate::error::PlayerError;

/// Default ring capacity in frames.
pub const DEFAULT_BUFFER_FRAMES: usize = 1 << 15;
/// Default destination pattern for auto-connecting output ports.
pub const DEFAULT_CONNECT_PATTERN: &str = "system:playback_%d";

/// How many times the source is played from start to end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopCount {
    /// Loop until stopped.
    Infinite,
    /// Play this many full passes (always `>= 1`).
    Passes(u32),
}

impl LoopCount {
    /// Interpret a user-facing count: `< 1` loops forever, otherwise that many passes.
    pub fn from_count(count: i64) -> Self {
        if count < 1 {
            LoopCount::Infinite
        } else {
            LoopCount::Passes(u32::try_from(count).unwrap_or(u32::MAX))
        }
    }

    /// Whether `completed` passes satisfy this target.
    pub fn is_reached(self, completed: u32) -> bool {
        match self {
            LoopCount::Infinite => false,
            LoopCount::Passes(n) => completed >= n,
        }
    }
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::Passes(1)
    }
}

impl fmt::Display for LoopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopCount::Infinite => f.write_str("infinite"),
            LoopCount::Passes(n) => write!(f, "{n}"),
        }
    }
}

/// Session parameters shared by the disk loop, the realtime callback and the session.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Number of passes through the source.
    pub loop_count: LoopCount,
    /// Ring buffer capacity in frames.
    pub buffer_frames: usize,
    /// Frames decoded per source read on the disk thread.
    pub chunk_frames: usize,
    /// Destination pattern for output ports; `%d` is the 1-based channel number.
    /// `None` leaves the ports unconnected.
    pub connect_pattern: Option<String>,
    /// Run the session's start gate before the disk thread starts filling.
    pub wait_before_play: bool,
    /// How often the session logs a status line while waiting.
    pub status_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            loop_count: LoopCount::default(),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            chunk_frames: 1024,
            connect_pattern: Some(DEFAULT_CONNECT_PATTERN.to_string()),
            wait_before_play: false,
            status_interval: Duration::from_secs(1),
        }
    }
}

impl PlayerConfig {
    /// Reject values that cannot produce a working pipeline.
    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.buffer_frames == 0 {
            return Err(PlayerError::Config("buffer_frames must be at least 1".into()));
        }
        if self.chunk_frames == 0 {
            return Err(PlayerError::Config("chunk_frames must be at least 1".into()));
        }
        if self.status_interval.is_zero() {
            return Err(PlayerError::Config("status_interval must be non-zero".into()));
        }
        if let Some(pattern) = &self.connect_pattern {
            if pattern.trim().is_empty() {
                return Err(PlayerError::Config("connect pattern is empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_count_below_one_is_infinite() {
        assert_eq!(LoopCount::from_count(0), LoopCount::Infinite);
        assert_eq!(LoopCount::from_count(-3), LoopCount::Infinite);
        assert_eq!(LoopCount::from_count(1), LoopCount::Passes(1));
        assert_eq!(LoopCount::from_count(5), LoopCount::Passes(5));
    }

    #[test]
    fn loop_count_saturates_large_values() {
        assert_eq!(LoopCount::from_count(i64::MAX), LoopCount::Passes(u32::MAX));
    }

    #[test]
    fn is_reached_counts_completed_passes() {
        assert!(!LoopCount::Passes(3).is_reached(2));
        assert!(LoopCount::Passes(3).is_reached(3));
        assert!(!LoopCount::Infinite.is_reached(u32::MAX));
    }

    #[test]
    fn defaults_play_once_and_connect_to_system() {
        let cfg = PlayerConfig::default();
        assert_eq!(cfg.loop_count, LoopCount::Passes(1));
        assert_eq!(cfg.connect_pattern.as_deref(), Some("system:playback_%d"));
        assert!(!cfg.wait_before_play);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let cfg = PlayerConfig {
            buffer_frames: 0,
            ..PlayerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PlayerError::Config(_))));

        let cfg = PlayerConfig {
            chunk_frames: 0,
            ..PlayerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = PlayerConfig {
            connect_pattern: Some("  ".to_string()),
            ..PlayerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loop_count_display() {
        assert_eq!(LoopCount::Infinite.to_string(), "infinite");
        assert_eq!(LoopCount::Passes(2).to_string(), "2");
    }
}
