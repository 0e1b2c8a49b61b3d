//! Realtime callback.
//!
//! Invoked by the audio host once per period. It drains whole frames from the ring into
//! the host's per-port outputs and then tries to wake the disk thread.
//!
//! ## Real-time constraints
//! `process` never blocks, allocates, logs or performs I/O. The only lock it touches is
//! the wake mutex, and only through `try_lock`. Underruns are filled with silence.

use std::sync::Arc;

use crate::disk::SAMPLE_SIZE;
use crate::ring_buffer::RingReader;
use crate::state::PlaybackState;
use crate::wake::WakeSignal;

/// Per-period output view handed to [`RealtimeCallback::process`].
pub trait PeriodOutput {
    /// Frames requested for this period.
    fn frames(&self) -> usize;

    /// Write one sample of port `port` at `frame`. Ports the output does not carry are
    /// ignored.
    fn write(&mut self, frame: usize, port: usize, sample: f32);

    /// Silence every port from `frame` to the end of the period.
    fn silence_from(&mut self, frame: usize);
}

/// Planar output: one buffer per port, each at least `frames` long.
pub struct PlanarOutput<'a> {
    ports: &'a mut [Vec<f32>],
    frames: usize,
}

impl<'a> PlanarOutput<'a> {
    pub fn new(ports: &'a mut [Vec<f32>], frames: usize) -> Self {
        let frames = ports.iter().map(Vec::len).min().unwrap_or(0).min(frames);
        Self { ports, frames }
    }
}

impl PeriodOutput for PlanarOutput<'_> {
    fn frames(&self) -> usize {
        self.frames
    }

    fn write(&mut self, frame: usize, port: usize, sample: f32) {
        if let Some(buf) = self.ports.get_mut(port) {
            buf[frame] = sample;
        }
    }

    fn silence_from(&mut self, frame: usize) {
        for buf in self.ports.iter_mut() {
            buf[frame.min(self.frames)..self.frames].fill(0.0);
        }
    }
}

/// What one period did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriodReport {
    pub frames_played: usize,
    pub underrun: bool,
    pub finished: bool,
}

/// Consumer side of the pipeline; owned by the host's audio thread.
pub struct RealtimeCallback {
    reader: RingReader,
    state: Arc<PlaybackState>,
    wake: Arc<WakeSignal>,
    channels: usize,
    bytes_per_frame: usize,
    frame: Vec<u8>,
}

impl RealtimeCallback {
    pub fn new(reader: RingReader, state: Arc<PlaybackState>, wake: Arc<WakeSignal>) -> Self {
        let channels = state.channels().max(1);
        let bytes_per_frame = SAMPLE_SIZE * channels;
        Self {
            reader,
            state,
            wake,
            channels,
            bytes_per_frame,
            frame: vec![0; bytes_per_frame],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn state(&self) -> &Arc<PlaybackState> {
        &self.state
    }

    /// Fill one period.
    pub fn process<O: PeriodOutput + ?Sized>(&mut self, out: &mut O) -> PeriodReport {
        let frames = out.frames();
        let mut report = PeriodReport::default();

        if self.state.is_finished() {
            out.silence_from(0);
            report.finished = true;
            return report;
        }
        if !self.state.is_ready() || self.state.stop_requested() {
            out.silence_from(0);
            return report;
        }

        for frame in 0..frames {
            if self.state.stop_requested() {
                out.silence_from(frame);
                break;
            }
            // Load the exhausted flag first: if it is set, every final commit is
            // already visible in the ring.
            let exhausted = self.state.is_source_exhausted();
            if self.reader.read_space() < self.bytes_per_frame {
                out.silence_from(frame);
                if exhausted {
                    self.state.mark_finished();
                    report.finished = true;
                } else {
                    self.state.record_underrun((frames - frame) as u64);
                    report.underrun = true;
                }
                break;
            }
            self.reader.read(&mut self.frame);
            for (port, bytes) in self.frame.chunks_exact(SAMPLE_SIZE).enumerate() {
                out.write(frame, port, f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
            }
            report.frames_played += 1;
        }

        if !report.finished && !report.underrun && self.drained() {
            self.state.mark_finished();
            report.finished = true;
        }

        self.state.advance_position(report.frames_played as u64);
        if !report.finished {
            self.wake.try_notify();
        }
        report
    }

    fn drained(&self) -> bool {
        let exhausted = self.state.is_source_exhausted();
        exhausted && self.reader.read_space() < self.bytes_per_frame
    }
}
