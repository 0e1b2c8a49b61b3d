//! Decodable audio sources consumed by the disk thread.
//!
//! A source yields interleaved `f32` frames at a fixed channel count. File decoding lives
//! in [`crate::decode`]; [`MemorySource`] serves frames from memory.

use crate::error::PlayerError;

/// Capability set the disk thread needs from an audio source.
pub trait StreamSource: Send {
    /// Interleaved channel count; fixed for the lifetime of the source.
    fn channels(&self) -> usize;

    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Read up to `frames` interleaved frames into `buf` (which holds at least
    /// `frames * channels` samples). Blocking.
    ///
    /// Returns the number of frames read; fewer than requested (including `0`) only at the
    /// end of the stream.
    fn read_frames(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, PlayerError>;

    /// Reposition to the first frame for the next loop pass.
    fn seek_to_start(&mut self) -> Result<(), PlayerError>;
}

impl<S: StreamSource + ?Sized> StreamSource for Box<S> {
    fn channels(&self) -> usize {
        (**self).channels()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn read_frames(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, PlayerError> {
        (**self).read_frames(buf, frames)
    }

    fn seek_to_start(&mut self) -> Result<(), PlayerError> {
        (**self).seek_to_start()
    }
}

/// Source backed by an in-memory buffer of interleaved samples.
#[derive(Clone, Debug)]
pub struct MemorySource {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    cursor: usize,
}

impl MemorySource {
    /// Wrap interleaved `samples`; a trailing partial frame is dropped.
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Result<Self, PlayerError> {
        if channels == 0 {
            return Err(PlayerError::Config("source must have at least one channel".into()));
        }
        let mut samples = samples;
        samples.truncate(samples.len() - samples.len() % channels);
        Ok(Self {
            samples,
            channels,
            sample_rate,
            cursor: 0,
        })
    }

    /// Total frames in one pass.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

impl StreamSource for MemorySource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, PlayerError> {
        let remaining = (self.samples.len() - self.cursor) / self.channels;
        let frames = frames.min(remaining).min(buf.len() / self.channels);
        let n = frames * self.channels;
        buf[..n].copy_from_slice(&self.samples[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(frames)
    }

    fn seek_to_start(&mut self) -> Result<(), PlayerError> {
        self.cursor = 0;
        Ok(())
    }
}
