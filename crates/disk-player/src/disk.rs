//! Disk fill loop.
//!
//! Runs on its own thread and keeps the ring topped up from a [`StreamSource`]:
//! 1. take the ring's free space as a write vector
//! 2. decode whole frames into each segment
//! 3. on a zero-frame read, finish a loop pass (seek back, or mark the source exhausted)
//! 4. commit, mark ready, then sleep until the realtime callback wakes us
//!
//! Samples travel through the ring as native-endian `f32` bytes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::PlayerError;
use crate::ring_buffer::RingWriter;
use crate::source::StreamSource;
use crate::state::PlaybackState;
use crate::wake::WakeSignal;

/// Bytes per interleaved sample in the ring.
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// What a single fill iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// Frames were decoded and committed.
    Filled { frames: usize },
    /// No room for a single frame; nothing was read.
    Full,
    /// The source ended and was rewound for another pass.
    LoopCompleted { pass: u32 },
    /// The final pass ended; the loop must exit.
    Exhausted,
    /// A stop was requested; the loop must exit.
    Stopped,
}

/// Totals reported when the loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub frames_read: u64,
    pub loops_completed: u32,
    pub stopped: bool,
}

/// Producer side of the pipeline.
pub struct DiskFillLoop<S: StreamSource> {
    source: S,
    writer: RingWriter,
    state: Arc<PlaybackState>,
    wake: Arc<WakeSignal>,
    channels: usize,
    bytes_per_frame: usize,
    chunk_frames: usize,
    scratch: Vec<f32>,
    frames_read: u64,
}

impl<S: StreamSource> DiskFillLoop<S> {
    pub fn new(
        source: S,
        writer: RingWriter,
        state: Arc<PlaybackState>,
        wake: Arc<WakeSignal>,
        chunk_frames: usize,
    ) -> Self {
        let channels = source.channels().max(1);
        let chunk_frames = chunk_frames.max(1);
        Self {
            source,
            writer,
            state,
            wake,
            channels,
            bytes_per_frame: SAMPLE_SIZE * channels,
            chunk_frames,
            scratch: vec![0.0; chunk_frames * channels],
            frames_read: 0,
        }
    }

    /// One iteration of the loop, without the wait.
    pub fn fill_once(&mut self) -> Result<FillOutcome, PlayerError> {
        if self.state.stop_requested() {
            return Ok(FillOutcome::Stopped);
        }
        if self.writer.write_space() < self.bytes_per_frame {
            self.state.mark_ready();
            return Ok(FillOutcome::Full);
        }

        let (frames, read_result) = self.read_into_free_space();
        self.frames_read += frames as u64;
        read_result?;

        if frames == 0 {
            let pass = self.state.complete_loop_pass();
            if self.state.loop_target().is_reached(pass) {
                self.state.mark_source_exhausted();
                self.state.mark_ready();
                tracing::debug!(pass, "source exhausted");
                return Ok(FillOutcome::Exhausted);
            }
            self.source.seek_to_start()?;
            self.state.mark_ready();
            tracing::debug!(pass, "loop pass completed");
            return Ok(FillOutcome::LoopCompleted { pass });
        }

        self.state.mark_ready();
        Ok(FillOutcome::Filled { frames })
    }

    /// Decode into the write vector and commit what was decoded. Returns the frames
    /// committed even when a read failed part way.
    fn read_into_free_space(&mut self) -> (usize, Result<(), PlayerError>) {
        let channels = self.channels;
        let bytes_per_frame = self.bytes_per_frame;
        let chunk_frames = self.chunk_frames;
        let mut total = 0;
        let mut result = Ok(());

        let mut vector = self.writer.write_vector();
        let (first, second) = vector.segments();
        'segments: for segment in [first, second] {
            let want = segment.len() / bytes_per_frame;
            let mut done = 0;
            while done < want {
                let ask = (want - done).min(chunk_frames);
                let got = match self.source.read_frames(&mut self.scratch[..ask * channels], ask) {
                    Ok(n) => n.min(ask),
                    Err(e) => {
                        total += done;
                        result = Err(e);
                        break 'segments;
                    }
                };
                let dst = &mut segment[done * bytes_per_frame..(done + got) * bytes_per_frame];
                for (bytes, sample) in dst
                    .chunks_exact_mut(SAMPLE_SIZE)
                    .zip(&self.scratch[..got * channels])
                {
                    bytes.copy_from_slice(&sample.to_ne_bytes());
                }
                done += got;
                if got < ask {
                    break;
                }
            }
            total += done;
            // Only continue into the wrapped segment when this one is full, so the
            // committed bytes stay contiguous.
            if done < want {
                break;
            }
        }
        vector.advance_write(total * bytes_per_frame);
        (total, result)
    }

    /// Fill, then sleep until woken, until the source is exhausted or a stop is requested.
    ///
    /// A source error marks the source exhausted (so the callback can drain and finish)
    /// and is returned.
    pub fn run(mut self) -> Result<FillSummary, PlayerError> {
        loop {
            match self.fill_once() {
                Ok(FillOutcome::Exhausted) => return Ok(self.summary(false)),
                Ok(FillOutcome::Stopped) => return Ok(self.summary(true)),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("disk thread error: {e}");
                    self.state.mark_source_exhausted();
                    self.state.mark_ready();
                    return Err(e);
                }
            }
            self.wake.wait();
        }
    }

    fn summary(&self, stopped: bool) -> FillSummary {
        FillSummary {
            frames_read: self.frames_read,
            loops_completed: self.state.loop_current(),
            stopped,
        }
    }
}

impl<S: StreamSource + 'static> DiskFillLoop<S> {
    /// Run the loop on a dedicated `disk-fill` thread.
    pub fn spawn(self) -> Result<JoinHandle<Result<FillSummary, PlayerError>>, PlayerError> {
        thread::Builder::new()
            .name("disk-fill".to_string())
            .spawn(move || self.run())
            .map_err(|e| PlayerError::DiskThread(e.to_string()))
    }
}
