//! Shared playback control block.
//!
//! Every mutable field has exactly one writer:
//! - realtime callback: `position`, `playback_finished`, underrun counters
//! - disk thread: `loop_current`, `ready_to_play`, `source_exhausted`
//! - session side (Ctrl-C, host shutdown hook): the stop request, `host_shutdown`
//!
//! Flags only ever go from `false` to `true`. Stores are `Release` and loads `Acquire`, so
//! a reader that sees a flag also sees everything its writer did before setting it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, Thread};

use crate::config::LoopCount;

/// Cross-thread stop request that also wakes the thread running the session.
#[derive(Clone, Debug)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    waiter: Thread,
}

impl StopHandle {
    /// Create a handle whose requests wake the calling thread.
    ///
    /// Create it on the thread that will run the session; other threads only clone it.
    pub fn for_current_thread() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waiter: thread::current(),
        }
    }

    /// Ask the session to stop. Idempotent.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.waiter.unpark();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn waiter(&self) -> &Thread {
        &self.waiter
    }
}

/// Position, loop counters and status flags shared by the two playback threads.
#[derive(Debug)]
pub struct PlaybackState {
    channels: usize,
    sample_rate: u32,
    loop_target: LoopCount,
    position: AtomicU64,
    loop_current: AtomicU32,
    ready_to_play: AtomicBool,
    source_exhausted: AtomicBool,
    playback_finished: AtomicBool,
    host_shutdown: AtomicBool,
    underrun_events: AtomicU64,
    underrun_frames: AtomicU64,
    stop: StopHandle,
}

impl PlaybackState {
    pub fn new(channels: usize, sample_rate: u32, loop_target: LoopCount, stop: StopHandle) -> Self {
        Self {
            channels,
            sample_rate,
            loop_target,
            position: AtomicU64::new(0),
            loop_current: AtomicU32::new(0),
            ready_to_play: AtomicBool::new(false),
            source_exhausted: AtomicBool::new(false),
            playback_finished: AtomicBool::new(false),
            host_shutdown: AtomicBool::new(false),
            underrun_events: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            stop,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn loop_target(&self) -> LoopCount {
        self.loop_target
    }

    /// Frames handed to the host so far.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn advance_position(&self, frames: u64) {
        self.position.fetch_add(frames, Ordering::AcqRel);
    }

    /// Completed passes through the source.
    pub fn loop_current(&self) -> u32 {
        self.loop_current.load(Ordering::Acquire)
    }

    /// Record the end of a pass and return the new number of completed passes.
    pub(crate) fn complete_loop_pass(&self) -> u32 {
        self.loop_current.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_to_play.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready_to_play.store(true, Ordering::Release);
    }

    pub fn is_source_exhausted(&self) -> bool {
        self.source_exhausted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_source_exhausted(&self) {
        self.source_exhausted.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.playback_finished.load(Ordering::Acquire)
    }

    /// Set the terminal flag and wake the session thread on the first transition.
    pub(crate) fn mark_finished(&self) {
        if !self.playback_finished.swap(true, Ordering::AcqRel) {
            self.stop.waiter().unpark();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// The host went away underneath the session.
    pub(crate) fn mark_host_shutdown(&self) {
        self.host_shutdown.store(true, Ordering::Release);
        self.stop.request();
    }

    pub fn host_shut_down(&self) -> bool {
        self.host_shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn record_underrun(&self, silent_frames: u64) {
        self.underrun_events.fetch_add(1, Ordering::Relaxed);
        self.underrun_frames.fetch_add(silent_frames, Ordering::Relaxed);
    }

    /// Best-effort snapshot for status reporting.
    pub fn snapshot(&self) -> StatusSnapshot {
        let position_frames = self.position();
        let elapsed_ms = if self.sample_rate > 0 {
            Some(position_frames.saturating_mul(1000) / self.sample_rate as u64)
        } else {
            None
        };
        StatusSnapshot {
            position_frames,
            elapsed_ms,
            loop_current: self.loop_current(),
            loop_target: self.loop_target,
            ready: self.is_ready(),
            source_exhausted: self.is_source_exhausted(),
            finished: self.is_finished(),
            underrun_events: self.underrun_events.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a [`PlaybackState`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub position_frames: u64,
    /// Elapsed playback time; `None` when the sample rate is unknown.
    pub elapsed_ms: Option<u64>,
    pub loop_current: u32,
    pub loop_target: LoopCount,
    pub ready: bool,
    pub source_exhausted: bool,
    pub finished: bool,
    pub underrun_events: u64,
    pub underrun_frames: u64,
}

/// Format milliseconds as `mm:ss.mmm`, or `h:mm:ss.mmm` past the hour.
pub fn format_elapsed(ms: u64) -> String {
    let millis = ms % 1000;
    let secs = (ms / 1000) % 60;
    let mins = (ms / 60_000) % 60;
    let hours = ms / 3_600_000;
    if hours > 0 {
        format!("{hours}:{mins:02}:{secs:02}.{millis:03}")
    } else {
        format!("{mins:02}:{secs:02}.{millis:03}")
    }
}
