//! Playback session: wires source, ring, disk thread and host together and blocks until
//! playback ends.
//!
//! Order of operations:
//! 1. register one output port per source channel
//! 2. activate the host with the realtime callback and a shutdown hook
//! 3. auto-connect ports (failures are warnings)
//! 4. run the start gate, if enabled
//! 5. spawn the disk thread and park until the callback finishes or a stop arrives
//! 6. wake and join the disk thread, deactivate the host

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PlayerConfig;
use crate::disk::{DiskFillLoop, FillSummary, SAMPLE_SIZE};
use crate::error::PlayerError;
use crate::host::{AudioHost, format_destination};
use crate::realtime::RealtimeCallback;
use crate::ring_buffer::{RingBuffer, RingWriter};
use crate::source::StreamSource;
use crate::state::{PlaybackState, StatusSnapshot, StopHandle, format_elapsed};
use crate::wake::WakeSignal;

/// Blocking hook run after ports are connected and before the disk thread starts.
pub type StartGate = Box<dyn FnOnce() -> io::Result<()>>;

/// Caller-side controls for one session.
pub struct SessionControls {
    /// Stop request shared with signal handlers. Its waiter must be the thread calling
    /// [`play`], so a finish or stop wakes the session promptly.
    pub stop: StopHandle,
    pub start_gate: Option<StartGate>,
}

impl SessionControls {
    pub fn new(stop: StopHandle) -> Self {
        Self {
            stop,
            start_gate: None,
        }
    }

    pub fn with_start_gate(mut self, gate: impl FnOnce() -> io::Result<()> + 'static) -> Self {
        self.start_gate = Some(Box::new(gate));
        self
    }
}

/// Why the session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The callback drained the final pass.
    Finished,
    /// A stop was requested.
    Stopped,
    /// The host went away.
    HostShutdown,
}

/// Totals reported once the session has torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    pub end: EndReason,
    pub frames_played: u64,
    pub frames_read: u64,
    pub loops_completed: u32,
    pub underrun_events: u64,
    pub underrun_frames: u64,
}

/// Play `source` through `host` and block until playback ends.
///
/// Setup errors are returned before any thread starts. Once the host is active it is
/// always deactivated before returning, including when the disk thread fails.
pub fn play<H, S>(
    host: &mut H,
    source: S,
    config: &PlayerConfig,
    controls: SessionControls,
) -> Result<PlaybackReport, PlayerError>
where
    H: AudioHost + ?Sized,
    S: StreamSource + 'static,
{
    config.validate()?;
    let channels = source.channels();
    if channels == 0 {
        return Err(PlayerError::Config("source has no channels".into()));
    }
    let sample_rate = source.sample_rate();
    if host.sample_rate() != sample_rate {
        tracing::warn!(
            source_hz = sample_rate,
            host_hz = host.sample_rate(),
            "sample rate mismatch; playback speed and pitch will be off"
        );
    }

    let state = Arc::new(PlaybackState::new(
        channels,
        sample_rate,
        config.loop_count,
        controls.stop.clone(),
    ));
    let wake = Arc::new(WakeSignal::new());
    let (writer, reader) = RingBuffer::for_frames(config.buffer_frames, SAMPLE_SIZE * channels)?;

    let ports = host.register_output_ports(channels)?;
    let callback = RealtimeCallback::new(reader, state.clone(), wake.clone());
    let hook_state = state.clone();
    host.activate(
        callback,
        Box::new(move || hook_state.mark_host_shutdown()),
    )?;
    tracing::debug!(client = host.name(), ports = ports.len(), "host active");

    let result = run_active(
        host,
        &ports,
        source,
        writer,
        &state,
        &wake,
        config,
        controls.start_gate,
    );

    if let Err(e) = host.deactivate() {
        tracing::warn!("host deactivation failed: {e}");
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn run_active<H, S>(
    host: &mut H,
    ports: &[String],
    source: S,
    writer: RingWriter,
    state: &Arc<PlaybackState>,
    wake: &Arc<WakeSignal>,
    config: &PlayerConfig,
    start_gate: Option<StartGate>,
) -> Result<PlaybackReport, PlayerError>
where
    H: AudioHost + ?Sized,
    S: StreamSource + 'static,
{
    if let Some(pattern) = &config.connect_pattern {
        connect_ports(host, ports, pattern)?;
    }

    if config.wait_before_play {
        match start_gate {
            Some(gate) => gate()?,
            None => tracing::warn!("start gate requested but none was provided"),
        }
    }

    let disk = DiskFillLoop::new(source, writer, state.clone(), wake.clone(), config.chunk_frames)
        .spawn()?;
    tracing::info!(loops = %state.loop_target(), "playing");

    let end = wait_for_end(state, config.status_interval);
    // The disk thread may be parked on the wake signal; let it observe the stop.
    wake.notify();

    let summary: FillSummary = disk
        .join()
        .map_err(|_| PlayerError::DiskThread("disk thread panicked".into()))??;

    let snap = state.snapshot();
    let report = PlaybackReport {
        end,
        frames_played: snap.position_frames,
        frames_read: summary.frames_read,
        loops_completed: snap.loop_current,
        underrun_events: snap.underrun_events,
        underrun_frames: snap.underrun_frames,
    };
    tracing::info!(
        end = ?report.end,
        frames = report.frames_played,
        loops = report.loops_completed,
        underruns = report.underrun_events,
        "playback ended"
    );
    Ok(report)
}

/// Connect port `n` to the pattern's `n`th destination. Failed connections are only
/// warned about; anything worse ends the session.
fn connect_ports<H: AudioHost + ?Sized>(
    host: &mut H,
    ports: &[String],
    pattern: &str,
) -> Result<(), PlayerError> {
    for (i, port) in ports.iter().enumerate() {
        let destination = format_destination(pattern, i + 1);
        match host.connect(port, &destination) {
            Ok(()) => tracing::info!(%port, %destination, "connected"),
            Err(e) if !e.is_fatal() => tracing::warn!("{e}"),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Park until the callback finishes or a stop is requested, logging status every `interval`.
fn wait_for_end(state: &PlaybackState, interval: Duration) -> EndReason {
    let mut last_status = Instant::now();
    let mut last_underruns = 0;
    loop {
        if state.is_finished() {
            return EndReason::Finished;
        }
        if state.stop_requested() {
            return if state.host_shut_down() {
                EndReason::HostShutdown
            } else {
                EndReason::Stopped
            };
        }
        thread::park_timeout(interval);
        if last_status.elapsed() >= interval {
            last_status = Instant::now();
            let snap = state.snapshot();
            log_status(&snap, &mut last_underruns);
        }
    }
}

fn log_status(snap: &StatusSnapshot, last_underruns: &mut u64) {
    let elapsed = snap
        .elapsed_ms
        .map(format_elapsed)
        .unwrap_or_else(|| "--:--.---".to_string());
    tracing::debug!(
        elapsed = %elapsed,
        frames = snap.position_frames,
        pass = snap.loop_current,
        loops = %snap.loop_target,
        ready = snap.ready,
        "status"
    );
    if snap.underrun_events > *last_underruns {
        tracing::debug!(
            events = snap.underrun_events - *last_underruns,
            total_frames = snap.underrun_frames,
            "underruns since last status"
        );
        *last_underruns = snap.underrun_events;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoopCount;
    use crate::host::ShutdownHook;
    use crate::host::offline::OfflineHost;
    use crate::source::MemorySource;

    fn config(loops: LoopCount) -> PlayerConfig {
        PlayerConfig {
            loop_count: loops,
            buffer_frames: 8,
            chunk_frames: 3,
            connect_pattern: None,
            status_interval: Duration::from_millis(5),
            ..PlayerConfig::default()
        }
    }

    #[test]
    fn invalid_config_fails_before_ports_are_registered() {
        let mut host = OfflineHost::new(8_000, 4);
        let source = MemorySource::new(vec![0.0; 4], 1, 8_000).unwrap();
        let cfg = PlayerConfig {
            buffer_frames: 0,
            ..config(LoopCount::Passes(1))
        };
        let err = play(
            &mut host,
            source,
            &cfg,
            SessionControls::new(StopHandle::for_current_thread()),
        )
        .unwrap_err();
        assert!(matches!(err, PlayerError::Config(_)));
        assert!(host.register_output_ports(1).is_ok());
    }

    #[test]
    fn rate_mismatch_still_plays() {
        let mut host = OfflineHost::new(44_100, 4);
        let source = MemorySource::new(vec![0.5, 0.25], 1, 8_000).unwrap();
        let report = play(
            &mut host,
            source,
            &config(LoopCount::Passes(1)),
            SessionControls::new(StopHandle::for_current_thread()),
        )
        .unwrap();
        assert_eq!(report.end, EndReason::Finished);
        assert_eq!(host.port_output(), vec![vec![0.5, 0.25]]);
    }

    #[test]
    fn host_shutdown_ends_session() {
        let mut host = OfflineHost::new(8_000, 2).with_shutdown_after(4);
        let source = MemorySource::new(vec![0.1; 16], 1, 8_000).unwrap();
        let report = play(
            &mut host,
            source,
            &config(LoopCount::Infinite),
            SessionControls::new(StopHandle::for_current_thread()),
        )
        .unwrap();
        assert_eq!(report.end, EndReason::HostShutdown);
        assert!(report.frames_played <= 8);
    }

    /// Offline host whose client vanishes as soon as a port is connected.
    struct VanishingHost(OfflineHost);

    impl AudioHost for VanishingHost {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn sample_rate(&self) -> u32 {
            self.0.sample_rate()
        }

        fn register_output_ports(&mut self, channels: usize) -> Result<Vec<String>, PlayerError> {
            self.0.register_output_ports(channels)
        }

        fn activate(
            &mut self,
            callback: RealtimeCallback,
            on_shutdown: ShutdownHook,
        ) -> Result<(), PlayerError> {
            self.0.activate(callback, on_shutdown)
        }

        fn connect(&mut self, _port: &str, _destination: &str) -> Result<(), PlayerError> {
            Err(PlayerError::HostUnavailable("client zombified".into()))
        }

        fn deactivate(&mut self) -> Result<(), PlayerError> {
            self.0.deactivate()
        }
    }

    #[test]
    fn fatal_connect_error_ends_session_before_playback() {
        let mut host = VanishingHost(OfflineHost::new(8_000, 4));
        let source = MemorySource::new(vec![0.5; 8], 1, 8_000).unwrap();
        let cfg = PlayerConfig {
            connect_pattern: Some("offline:capture_%d".to_string()),
            ..config(LoopCount::Passes(1))
        };
        let err = play(
            &mut host,
            source,
            &cfg,
            SessionControls::new(StopHandle::for_current_thread()),
        )
        .unwrap_err();
        assert!(matches!(err, PlayerError::HostUnavailable(_)));
        assert!(host.0.port_output()[0].is_empty());
    }
}
