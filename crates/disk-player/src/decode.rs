//! File-backed [`StreamSource`] using Symphonia.
//!
//! Symphonia:
//! - probes the container with the file extension as a hint
//! - decodes the default track into interleaved `f32`
//!
//! Decoded packets rarely line up with the disk thread's read sizes, so leftover samples are
//! kept between calls and every read is filled completely unless the stream ends.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::PlayerError;
use crate::source::StreamSource;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Frames in one pass, when the container reports it.
    pub duration_frames: Option<u64>,
    /// Duration of one pass in milliseconds, when known.
    pub duration_ms: Option<u64>,
}

struct OpenTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    params: CodecParameters,
}

/// Streaming decoder over an audio file on disk.
pub struct SymphoniaSource {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    info: SourceInfo,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: usize,
    pending: Vec<f32>,
    pending_pos: usize,
    end_of_stream: bool,
}

impl SymphoniaSource {
    /// Probe `path` and prepare a decoder for its default track.
    ///
    /// Every failure here is reported as [`PlayerError::SourceOpen`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PlayerError> {
        let path = path.as_ref().to_path_buf();
        let track = open_track(&path)?;
        let info = SourceInfo {
            codec: codec_name_from_params(&track.params),
            bit_depth: track
                .params
                .bits_per_sample
                .or(track.params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            duration_frames: track.params.n_frames,
            duration_ms: duration_ms_from_codec_params(&track.params),
        };

        Ok(Self {
            path,
            format: track.format,
            decoder: track.decoder,
            track_id: track.track_id,
            channels: track.channels,
            sample_rate: track.sample_rate,
            info,
            sample_buf: None,
            sample_buf_frames: 0,
            pending: Vec::new(),
            pending_pos: 0,
            end_of_stream: false,
        })
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `Ok(false)` at the end of the stream. Corrupt packets are skipped.
    fn decode_next_packet(&mut self) -> Result<bool, PlayerError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(PlayerError::Decode(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(reason)) => {
                    tracing::warn!(path = ?self.path, reason, "skipping corrupt packet");
                    continue;
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(e) => return Err(PlayerError::Decode(e.to_string())),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            if spec.channels.count() != self.channels {
                return Err(PlayerError::Decode(format!(
                    "channel count changed from {} to {}",
                    self.channels,
                    spec.channels.count()
                )));
            }
            if self.sample_buf.is_none() || self.sample_buf_frames < decoded.frames() {
                self.sample_buf_frames = decoded.frames();
                self.sample_buf = Some(SampleBuffer::new(decoded.frames() as u64, spec));
            }
            let Some(sample_buf) = self.sample_buf.as_mut() else {
                continue;
            };
            sample_buf.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(sample_buf.samples());
            self.pending_pos = 0;
            return Ok(true);
        }
    }
}

impl StreamSource for SymphoniaSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, PlayerError> {
        let want = frames.min(buf.len() / self.channels) * self.channels;
        let mut filled = 0;

        while filled < want {
            if self.pending_pos < self.pending.len() {
                let n = (want - filled).min(self.pending.len() - self.pending_pos);
                buf[filled..filled + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                filled += n;
                self.pending_pos += n;
                continue;
            }
            if self.end_of_stream {
                break;
            }
            if !self.decode_next_packet()? {
                self.end_of_stream = true;
            }
        }

        Ok(filled / self.channels)
    }

    /// Reopen and re-probe the file so every pass starts from identical decoder state.
    fn seek_to_start(&mut self) -> Result<(), PlayerError> {
        let track = open_track(&self.path)?;
        if track.channels != self.channels {
            return Err(PlayerError::Decode(format!(
                "{:?} changed channel count on reopen",
                self.path
            )));
        }
        self.format = track.format;
        self.decoder = track.decoder;
        self.track_id = track.track_id;
        self.pending.clear();
        self.pending_pos = 0;
        self.end_of_stream = false;
        Ok(())
    }
}

fn open_track(path: &Path) -> Result<OpenTrack, PlayerError> {
    let open_err = |reason: String| PlayerError::SourceOpen {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| open_err(e.to_string()))?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| open_err("no default audio track".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let channels = params
        .channels
        .ok_or_else(|| open_err("unknown channel layout".to_string()))?
        .count();
    if channels == 0 {
        return Err(open_err("track has no channels".to_string()));
    }
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| open_err("unknown sample rate".to_string()))?;

    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| open_err(e.to_string()))?;

    Ok(OpenTrack {
        format,
        decoder,
        track_id,
        channels,
        sample_rate,
        params,
    })
}

/// Best-effort duration in milliseconds from codec metadata.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for the startup banner.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
