//! Decoder abstraction.
//!
//! Voices never know concretely what is producing samples or frames; they only see a
//! [`MediaDecoder`] (and, optionally, a [`VideoDecoder`]). This crate ships one real
//! implementation, [`SymphoniaAudioDecoder`], wrapping Symphonia's format/codec readers, plus
//! (behind `cfg(test)` / the `test-util` feature) an in-memory [`fake::FakeDecoder`] double used
//! by the integration tests.

use std::num::NonZeroU64;
use std::path::Path;

use symphonia::core::audio::{AudioBuffer, Signal};
use symphonia::core::codecs::Decoder as SymphoniaDecoderTrait;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::units::Time;

use crate::error::{Error, Result};

/// Position, in normalized `[0, 1]` media-relative units, or `None` if the decoder cannot report
/// one (e.g. it has never been started).
pub type NormalizedPosition = f64;

/// The audio half of the opaque decoder contract a voice drives.
///
/// Implementors must never allocate or block inside [`MediaDecoder::read_block`]; that method is
/// called from the audio callback.
pub trait MediaDecoder: Send {
    /// Current normalized position in `[0, 1]`, or `0.0` if unknown.
    fn position(&self) -> NormalizedPosition;

    /// Begin producing audio. A no-op if already playing, per the documented contract voices rely
    /// on (`Voice::start` always stops before calling `play` again).
    fn play(&mut self);

    /// Stop producing audio; the decoder retains its last position.
    fn stop(&mut self);

    /// Seek to a normalized position in `[0, 1]`.
    fn set_position(&mut self, position: NormalizedPosition) -> Result<()>;

    /// Fill `out` (interleaved, `channels` wide) with the next frames, returning the number of
    /// frames actually written. Writes silence (not an error) past end-of-stream.
    fn read_block(&mut self, out: &mut [f32], channels: usize) -> usize;

    fn is_playing(&self) -> bool;

    /// Total duration in seconds, if known.
    fn duration_seconds(&self) -> Option<f64>;

    fn sample_rate(&self) -> u32;

    fn channel_count(&self) -> usize;
}

/// The (optional) video half.
pub trait VideoDecoder: Send {
    fn position(&self) -> NormalizedPosition;
    fn play(&mut self);
    fn stop(&mut self);
    fn set_position(&mut self, position: NormalizedPosition) -> Result<()>;

    /// Advance to the frame nearest the current position and return a handle to it, or `None` if
    /// nothing new is ready. The returned frame number is a monotonically increasing counter the
    /// video mixer can use to deduplicate.
    fn pull_frame(&mut self) -> Option<VideoFrameHandle>;

    fn is_playing(&self) -> bool;
    fn duration_seconds(&self) -> Option<f64>;
}

/// A lightweight handle identifying a decoded video frame without the crate owning pixel storage
/// (frame buffers are the host's problem per the out-of-scope GUI/rendering boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameHandle {
    pub frame_index: u64,
}

fn eof(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(i) if i.kind() == std::io::ErrorKind::UnexpectedEof)
}

/// A real [`MediaDecoder`] backed by `symphonia`, supporting any format/codec combination the
/// `all-codecs` feature set pulls in.
///
/// `read_block` decodes packets directly on the calling thread, which can allocate on a cache
/// miss inside `symphonia` (e.g. `make_equivalent` when a packet's channel layout changes). A
/// production deployment wanting hard allocation-free audio callbacks would run this decoder on
/// a background thread and hand the real-time side a preallocated ring of decoded samples to
/// drain from instead of calling into Symphonia directly from the callback; that extra hop is not
/// implemented here (see `DESIGN.md`).
pub struct SymphoniaAudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoderTrait>,
    track_id: u32,
    sample_rate: NonZeroU64,
    channel_count: usize,
    duration_frames: Option<u64>,

    buffer: AudioBuffer<f32>,
    buffer_read_frames: usize,
    is_at_eof: bool,
    playing: bool,
    /// Frames emitted since the last seek (seek resets this to the sought frame). Symphonia has no
    /// cheap "current position" query, so it's tracked here instead.
    frames_emitted: u64,
}

impl SymphoniaAudioDecoder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::DecoderOpen {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        Self::from_media_source_stream(mss).map_err(|e| Error::DecoderOpen {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn from_media_source_stream(
        mss: MediaSourceStream,
    ) -> std::result::Result<Self, SymphoniaError> {
        let probe = symphonia::default::get_probe();
        let probed = probe.format(
            &Default::default(),
            mss,
            &Default::default(),
            &Default::default(),
        )?;
        let format = probed.format;

        let track_index = format
            .tracks()
            .iter()
            .position(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or_else(|| {
                SymphoniaError::Unsupported("no decodable audio tracks in this source")
            })?;
        let track = &format.tracks()[track_index];
        let track_id = track.id;

        let sample_rate = track
            .codec_params
            .sample_rate
            .and_then(|r| NonZeroU64::new(r as u64))
            .unwrap_or_else(|| NonZeroU64::new(44100).unwrap());
        let channel_count = track
            .codec_params
            .channels
            .map(|c| c.bits().count_ones() as usize)
            .unwrap_or(2)
            .max(1);
        let duration_frames = track.codec_params.n_frames;

        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &Default::default())?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channel_count,
            duration_frames,
            buffer: AudioBuffer::unused(),
            buffer_read_frames: 0,
            is_at_eof: false,
            playing: false,
            frames_emitted: 0,
        })
    }

    fn refill_buffer(&mut self) -> std::result::Result<bool, SymphoniaError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(e) if eof(&e) => {
                    self.is_at_eof = true;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = self.decoder.decode(&packet)?;
            self.buffer = decoded.make_equivalent();
            decoded.convert(&mut self.buffer);
            self.buffer_read_frames = 0;
            return Ok(true);
        }
    }

    fn do_seek(&mut self, frame: u64) -> std::result::Result<(), SymphoniaError> {
        self.buffer = AudioBuffer::unused();
        self.buffer_read_frames = 0;
        self.is_at_eof = false;

        let ts_seconds = frame as f64 / self.sample_rate.get() as f64;
        let time = Time {
            seconds: ts_seconds as u64,
            frac: ts_seconds - ts_seconds.floor(),
        };
        let seek_to = SeekTo::Time {
            time,
            track_id: Some(self.track_id),
        };
        self.format.seek(SeekMode::Accurate, seek_to)?;
        self.decoder.reset();
        self.frames_emitted = frame;
        Ok(())
    }
}

impl MediaDecoder for SymphoniaAudioDecoder {
    fn position(&self) -> NormalizedPosition {
        let Some(total) = self.duration_frames else {
            return 0.0;
        };
        if total == 0 {
            return 0.0;
        }
        (self.frames_emitted as f64 / total as f64).clamp(0.0, 1.0)
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn set_position(&mut self, position: NormalizedPosition) -> Result<()> {
        let total = self.duration_frames.unwrap_or(0);
        let frame = (position.clamp(0.0, 1.0) * total as f64) as u64;
        self.do_seek(frame).map_err(|e| Error::DecoderSeek {
            message: e.to_string(),
        })
    }

    fn read_block(&mut self, out: &mut [f32], channels: usize) -> usize {
        if !self.playing || self.is_at_eof {
            out.fill(0.0);
            return 0;
        }

        let total_frames = out.len() / channels;
        let mut written = 0;

        while written < total_frames {
            if self.buffer_read_frames >= self.buffer.frames() {
                match self.refill_buffer() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(_) => {
                        self.is_at_eof = true;
                        break;
                    }
                }
            }

            let avail = self.buffer.frames() - self.buffer_read_frames;
            let can_do = avail.min(total_frames - written);
            let src_channels = (self.buffer.spec().channels.bits().count_ones() as usize).max(1);

            for f in 0..can_do {
                for ch in 0..channels {
                    let src_ch = ch.min(src_channels - 1);
                    out[(written + f) * channels + ch] =
                        self.buffer.chan(src_ch)[self.buffer_read_frames + f];
                }
            }
            self.buffer_read_frames += can_do;
            written += can_do;
        }

        out[written * channels..].fill(0.0);
        self.frames_emitted += written as u64;
        written
    }

    fn is_playing(&self) -> bool {
        self.playing && !self.is_at_eof
    }

    fn duration_seconds(&self) -> Option<f64> {
        self.duration_frames
            .map(|f| f as f64 / self.sample_rate.get() as f64)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate.get() as u32
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
