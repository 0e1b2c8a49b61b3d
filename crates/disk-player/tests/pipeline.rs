use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use disk_player::PlayerError;
use disk_player::config::{LoopCount, PlayerConfig};
use disk_player::host::offline::OfflineHost;
use disk_player::session::{self, EndReason, SessionControls};
use disk_player::source::{MemorySource, StreamSource};
use disk_player::state::StopHandle;

fn config(loops: LoopCount, buffer_frames: usize) -> PlayerConfig {
    PlayerConfig {
        loop_count: loops,
        buffer_frames,
        chunk_frames: 5,
        connect_pattern: Some("offline:capture_%d".to_string()),
        status_interval: Duration::from_millis(10),
        ..PlayerConfig::default()
    }
}

fn controls() -> SessionControls {
    SessionControls::new(StopHandle::for_current_thread())
}

fn ramp(frames: usize, channels: usize) -> Vec<f32> {
    (0..frames * channels).map(|i| i as f32 / 1000.0).collect()
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    (0..channels)
        .map(|ch| samples.iter().skip(ch).step_by(channels).copied().collect())
        .collect()
}

#[test]
fn loops_play_the_source_back_to_back() {
    let samples = ramp(37, 2);
    let source = MemorySource::new(samples.clone(), 2, 48_000).unwrap();
    let mut host = OfflineHost::new(48_000, 8);

    let report = session::play(&mut host, source, &config(LoopCount::Passes(2), 16), controls())
        .unwrap();

    assert_eq!(report.end, EndReason::Finished);
    assert_eq!(report.frames_played, 74);
    assert_eq!(report.frames_read, 74);
    assert_eq!(report.loops_completed, 2);

    let expected: Vec<Vec<f32>> = deinterleave(&samples, 2)
        .into_iter()
        .map(|ch| [ch.clone(), ch].concat())
        .collect();
    assert_eq!(host.port_output(), expected);
}

#[test]
fn ports_are_connected_to_capture_destinations() {
    let samples = ramp(10, 2);
    let source = MemorySource::new(samples.clone(), 2, 48_000).unwrap();
    let mut host = OfflineHost::new(48_000, 4).with_period_sleep(Duration::from_millis(1));

    let cfg = PlayerConfig {
        wait_before_play: true,
        ..config(LoopCount::Passes(1), 64)
    };
    let ctl = controls().with_start_gate(|| {
        thread::sleep(Duration::from_millis(5));
        Ok(())
    });
    session::play(&mut host, source, &cfg, ctl).unwrap();

    let channels = deinterleave(&samples, 2);
    assert_eq!(host.captured(1), channels[0]);
    assert_eq!(host.captured(2), channels[1]);
}

#[test]
fn failed_connections_do_not_stop_playback() {
    let source = MemorySource::new(ramp(6, 1), 1, 8_000).unwrap();
    let mut host = OfflineHost::new(8_000, 4);
    let cfg = PlayerConfig {
        connect_pattern: Some("nowhere:playback_%d".to_string()),
        ..config(LoopCount::Passes(1), 16)
    };

    let report = session::play(&mut host, source, &cfg, controls()).unwrap();
    assert_eq!(report.end, EndReason::Finished);
    assert_eq!(host.port_output()[0], ramp(6, 1));
    assert!(host.captured(1).is_empty());
}

#[test]
fn infinite_loop_runs_until_stopped() {
    let source = MemorySource::new(vec![0.5, -0.5, 0.25], 1, 8_000).unwrap();
    let mut host = OfflineHost::new(8_000, 2).with_period_sleep(Duration::from_micros(200));
    let stop = StopHandle::for_current_thread();
    let remote = stop.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.request();
    });

    let report = session::play(
        &mut host,
        source,
        &config(LoopCount::Infinite, 8),
        SessionControls::new(stop),
    )
    .unwrap();
    stopper.join().unwrap();

    assert_eq!(report.end, EndReason::Stopped);
    assert!(report.loops_completed >= 1);
    let played = &host.port_output()[0];
    assert!(!played.is_empty());
    for (i, sample) in played.iter().enumerate() {
        assert_eq!(*sample, [0.5, -0.5, 0.25][i % 3]);
    }
}

#[test]
fn start_gate_error_aborts_before_playback() {
    let source = MemorySource::new(vec![0.1; 8], 1, 8_000).unwrap();
    let mut host = OfflineHost::new(8_000, 4);
    let cfg = PlayerConfig {
        wait_before_play: true,
        ..config(LoopCount::Passes(1), 16)
    };
    let ctl = controls().with_start_gate(|| Err(io::Error::other("stdin closed")));

    let err = session::play(&mut host, source, &cfg, ctl).unwrap_err();
    assert!(matches!(err, PlayerError::Io(_)));
    assert!(host.port_output()[0].is_empty());
}

#[test]
fn gate_is_skipped_when_waiting_is_disabled() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    let source = MemorySource::new(vec![0.1; 4], 1, 8_000).unwrap();
    let mut host = OfflineHost::new(8_000, 4);
    let ctl = controls().with_start_gate(move || {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    session::play(&mut host, source, &config(LoopCount::Passes(1), 16), ctl).unwrap();
    assert!(!called.load(Ordering::SeqCst));
}

/// Yields a few good frames, then fails every read.
struct BrokenSource {
    good: usize,
}

impl StreamSource for BrokenSource {
    fn channels(&self) -> usize {
        1
    }

    fn sample_rate(&self) -> u32 {
        8_000
    }

    fn read_frames(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, PlayerError> {
        if self.good == 0 {
            return Err(PlayerError::Decode("truncated block".into()));
        }
        let n = frames.min(self.good);
        buf[..n].fill(0.75);
        self.good -= n;
        Ok(n)
    }

    fn seek_to_start(&mut self) -> Result<(), PlayerError> {
        Ok(())
    }
}

#[test]
fn disk_error_is_reported_after_buffered_audio_drains() {
    let mut host = OfflineHost::new(8_000, 3);
    let err = session::play(
        &mut host,
        BrokenSource { good: 7 },
        &config(LoopCount::Passes(1), 32),
        controls(),
    )
    .unwrap_err();

    assert!(matches!(err, PlayerError::Decode(_)));
    assert_eq!(host.port_output()[0], vec![0.75; 7]);
}

#[test]
fn empty_source_finishes_immediately() {
    let source = MemorySource::new(Vec::new(), 2, 8_000).unwrap();
    let mut host = OfflineHost::new(8_000, 4);
    let report = session::play(&mut host, source, &config(LoopCount::Passes(3), 8), controls())
        .unwrap();
    assert_eq!(report.end, EndReason::Finished);
    assert_eq!(report.frames_played, 0);
    // Every pass over an empty source is still counted.
    assert_eq!(report.loops_completed, 3);
}
