//! Single-producer / single-consumer byte ring buffer.
//!
//! This is the only data path between the two playback threads:
//! - disk thread → [`RingWriter::write_vector`] + [`WriteVector::advance_write`]
//! - realtime callback → [`RingReader::read`] (never blocks, never allocates)
//!
//! The writer decodes straight into the free space (at most two segments because of
//! wraparound); the buffer itself only copies on the read side. Storage and cursor
//! publication come from `rtrb`.

use rtrb::chunks::WriteChunk;
use rtrb::{Consumer, Producer};

use crate::error::PlayerError;

/// Constructors for a [`RingWriter`] / [`RingReader`] pair.
pub struct RingBuffer;

impl RingBuffer {
    /// Create a ring of `capacity` bytes and split it into its two halves.
    pub fn new(capacity: usize) -> Result<(RingWriter, RingReader), PlayerError> {
        if capacity == 0 {
            return Err(PlayerError::Config("ring buffer capacity must be non-zero".into()));
        }
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        Ok((RingWriter { producer }, RingReader { consumer }))
    }

    /// Create a ring holding exactly `frames` frames of `bytes_per_frame` bytes.
    ///
    /// Sizing by whole frames keeps every committed frame contiguous modulo the capacity,
    /// so a frame is never split across the wrap point by the writer.
    pub fn for_frames(
        frames: usize,
        bytes_per_frame: usize,
    ) -> Result<(RingWriter, RingReader), PlayerError> {
        if bytes_per_frame == 0 {
            return Err(PlayerError::Config("frame size must be non-zero".into()));
        }
        let capacity = frames.checked_mul(bytes_per_frame).ok_or_else(|| {
            PlayerError::Config(format!("{frames} frames of {bytes_per_frame} bytes overflow"))
        })?;
        Self::new(capacity)
    }
}

/// Free space of the ring as up to two writable segments.
///
/// The second segment is non-empty only when the free region wraps around the end of the
/// storage. Bytes written here become visible to the reader only after
/// [`WriteVector::advance_write`]; dropping the vector commits nothing.
pub struct WriteVector<'a> {
    chunk: Option<WriteChunk<'a, u8>>,
    len: usize,
}

impl WriteVector<'_> {
    /// Total free bytes across both segments.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow `(first, second)` in write order.
    pub fn segments(&mut self) -> (&mut [u8], &mut [u8]) {
        match &mut self.chunk {
            Some(chunk) => chunk.as_mut_slices(),
            None => (Default::default(), Default::default()),
        }
    }

    /// Commit the first `n` bytes written through [`Self::segments`].
    ///
    /// `n` must not exceed [`Self::len`]; larger values are clamped.
    pub fn advance_write(self, n: usize) {
        debug_assert!(n <= self.len, "advance_write({n}) exceeds free space {}", self.len);
        if let Some(chunk) = self.chunk {
            chunk.commit(n.min(self.len));
        }
    }
}

/// Producer half; owned by the disk thread.
pub struct RingWriter {
    producer: Producer<u8>,
}

impl RingWriter {
    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }

    /// Bytes that can currently be written.
    pub fn write_space(&self) -> usize {
        self.producer.slots()
    }

    /// Borrow the free space as up to two contiguous segments. Never blocks.
    pub fn write_vector(&mut self) -> WriteVector<'_> {
        let free = self.producer.slots();
        // Only this half shrinks the free space, so a chunk of `free` slots is available.
        let chunk = self.producer.write_chunk(free).ok();
        let len = if chunk.is_some() { free } else { 0 };
        WriteVector { chunk, len }
    }
}

/// Consumer half; owned by the realtime callback.
pub struct RingReader {
    consumer: Consumer<u8>,
}

impl RingReader {
    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.consumer.buffer().capacity()
    }

    /// Bytes currently available to read.
    pub fn read_space(&self) -> usize {
        self.consumer.slots()
    }

    /// Copy up to `dst.len()` of the oldest unread bytes into `dst` and consume them.
    ///
    /// Returns the number of bytes copied: `0` when empty, less than requested when the
    /// ring holds less. Never blocks.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.consumer.slots());
        if n == 0 {
            return 0;
        }
        let Ok(chunk) = self.consumer.read_chunk(n) else {
            return 0;
        };
        let (first, second) = chunk.as_slices();
        dst[..first.len()].copy_from_slice(first);
        dst[first.len()..n].copy_from_slice(second);
        chunk.commit_all();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn write_bytes(writer: &mut RingWriter, bytes: &[u8]) -> usize {
        let mut vector = writer.write_vector();
        let (first, second) = vector.segments();
        let n = bytes.len().min(first.len() + second.len());
        let head = n.min(first.len());
        first[..head].copy_from_slice(&bytes[..head]);
        second[..n - head].copy_from_slice(&bytes[head..n]);
        vector.advance_write(n);
        n
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(RingBuffer::new(0), Err(PlayerError::Config(_))));
        assert!(matches!(RingBuffer::for_frames(16, 0), Err(PlayerError::Config(_))));
    }

    #[test]
    fn for_frames_sizes_whole_frames() {
        let (writer, reader) = RingBuffer::for_frames(4, 8).unwrap();
        assert_eq!(writer.capacity(), 32);
        assert_eq!(reader.capacity(), 32);
    }

    #[test]
    fn read_from_empty_returns_zero() {
        let (_writer, mut reader) = RingBuffer::new(16).unwrap();
        let mut dst = [0u8; 8];
        assert_eq!(reader.read(&mut dst), 0);
        assert_eq!(reader.read_space(), 0);
    }

    #[test]
    fn full_buffer_has_empty_write_vector() {
        let (mut writer, reader) = RingBuffer::new(8).unwrap();
        assert_eq!(write_bytes(&mut writer, &[1; 8]), 8);
        assert!(writer.write_vector().is_empty());
        assert_eq!(writer.write_space(), 0);
        assert_eq!(reader.read_space(), 8);
    }

    #[test]
    fn write_vector_splits_at_wraparound() {
        let (mut writer, mut reader) = RingBuffer::new(8).unwrap();
        write_bytes(&mut writer, &[1, 2, 3, 4, 5, 6]);
        let mut dst = [0u8; 4];
        assert_eq!(reader.read(&mut dst), 4);

        let mut vector = writer.write_vector();
        assert_eq!(vector.len(), 6);
        let (first, second) = vector.segments();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 4);
        first.copy_from_slice(&[7, 8]);
        second.copy_from_slice(&[9, 10, 11, 12]);
        vector.advance_write(6);

        let mut out = [0u8; 8];
        assert_eq!(reader.read(&mut out), 8);
        assert_eq!(out, [5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn dropped_write_vector_commits_nothing() {
        let (mut writer, reader) = RingBuffer::new(4).unwrap();
        {
            let mut vector = writer.write_vector();
            vector.segments().0.fill(1);
        }
        assert_eq!(reader.read_space(), 0);
        assert_eq!(writer.write_space(), 4);
    }

    #[test]
    fn read_spans_wraparound_in_order() {
        let (mut writer, mut reader) = RingBuffer::new(8).unwrap();
        write_bytes(&mut writer, &[1, 2, 3, 4, 5, 6]);
        let mut dst = [0u8; 5];
        assert_eq!(reader.read(&mut dst), 5);
        write_bytes(&mut writer, &[7, 8, 9, 10]);

        let mut out = [0u8; 8];
        assert_eq!(reader.read(&mut out), 5);
        assert_eq!(&out[..5], &[6, 7, 8, 9, 10]);
    }

    #[test]
    fn read_larger_than_capacity_returns_partial() {
        let (mut writer, mut reader) = RingBuffer::new(6).unwrap();
        write_bytes(&mut writer, &[9, 8, 7, 6]);
        let mut period = [0u8; 32];
        assert_eq!(reader.read(&mut period), 4);
        assert_eq!(&period[..4], &[9, 8, 7, 6]);
        assert_eq!(reader.read(&mut period), 0);
    }

    #[test]
    fn writer_and_reader_on_separate_threads_preserve_order() {
        let (mut writer, mut reader) = RingBuffer::new(64).unwrap();
        let total: usize = 10_000;

        let producer = std::thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let chunk: Vec<u8> = (next..total.min(next + 48)).map(|v| v as u8).collect();
                next += write_bytes(&mut writer, &chunk);
                std::thread::yield_now();
            }
        });

        let mut seen = 0usize;
        let mut dst = [0u8; 24];
        while seen < total {
            let n = reader.read(&mut dst);
            for byte in &dst[..n] {
                assert_eq!(*byte, seen as u8);
                seen += 1;
            }
            if n == 0 {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(usize),
        Read(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0usize..40).prop_map(Op::Write), (0usize..40).prop_map(Op::Read)]
    }

    proptest! {
        #[test]
        fn reads_return_written_bytes_in_fifo_order(
            capacity in 1usize..32,
            ops in proptest::collection::vec(op(), 1..200),
        ) {
            let (mut writer, mut reader) = RingBuffer::new(capacity).unwrap();
            let mut next_write: u64 = 0;
            let mut next_read: u64 = 0;

            for op in ops {
                match op {
                    Op::Write(len) => {
                        let len = len.min(writer.write_space());
                        let bytes: Vec<u8> =
                            (next_write..next_write + len as u64).map(|v| v as u8).collect();
                        prop_assert_eq!(write_bytes(&mut writer, &bytes), len);
                        next_write += len as u64;
                    }
                    Op::Read(len) => {
                        let mut dst = vec![0u8; len];
                        let n = reader.read(&mut dst);
                        prop_assert!(n <= len);
                        for byte in &dst[..n] {
                            prop_assert_eq!(*byte, next_read as u8);
                            next_read += 1;
                        }
                    }
                }
                prop_assert!(next_read <= next_write);
                prop_assert_eq!(reader.read_space() as u64, next_write - next_read);
                prop_assert_eq!(writer.write_space(), capacity - reader.read_space());
            }
        }
    }
}
