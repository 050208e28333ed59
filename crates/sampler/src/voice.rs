//! A single playback voice: one decoder pair, one envelope, one set of playback parameters.

use std::time::Instant;

use crate::config::POSITION_SEEK_THRESHOLD;
use crate::config::POSITION_VALID_THRESHOLD;
use crate::decoder::{MediaDecoder, VideoDecoder};
use crate::envelope::Envelope;
use crate::logging::rt_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Free,
    Playing,
    Releasing,
}

/// Per-voice playback parameters, all normalized `[0, 1]` positions unless noted.
#[derive(Debug, Clone)]
pub struct VoiceParams {
    /// Region-relative start position: `0` = `region_start`, `1` = `region_end`.
    pub start_position: f64,
    pub playhead_position: f64,
    pub region_start: f64,
    pub region_end: f64,
    pub speed: f32,
    pub volume: f32,
    /// Seconds.
    pub loop_size: f64,
    pub loop_enabled: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            start_position: 0.0,
            playhead_position: 0.0,
            region_start: 0.0,
            region_end: 1.0,
            speed: 1.0,
            volume: 1.0,
            loop_size: 1.0,
            loop_enabled: false,
            audio_enabled: true,
            video_enabled: true,
        }
    }
}

/// One active or recently-active playback.
pub struct Voice {
    pub state: VoiceState,
    pub media_index: i32,
    audio_decoder: Option<Box<dyn MediaDecoder>>,
    video_decoder: Option<Box<dyn VideoDecoder>>,
    pub envelope: Envelope,
    pub start_time: Instant,
    pub params: VoiceParams,
    /// Previous observed (absolute) decoder position, used by the backward-loop wrap correction.
    last_observed_position: f64,
}

impl Voice {
    pub fn new(start_time: Instant) -> Self {
        Self {
            state: VoiceState::Free,
            media_index: -1,
            audio_decoder: None,
            video_decoder: None,
            envelope: Envelope::new(),
            start_time,
            params: VoiceParams::default(),
            last_observed_position: 0.0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == VoiceState::Free
    }

    /// Bind decoders freshly allocated by the caller (the control thread) for a new or retriggered
    /// slot. Replaces any previous decoders.
    pub fn bind_decoders(
        &mut self,
        audio: Option<Box<dyn MediaDecoder>>,
        video: Option<Box<dyn VideoDecoder>>,
    ) {
        self.audio_decoder = audio;
        self.video_decoder = video;
    }

    /// `stop()` the decoder, seek to `target_position`, `play()`, then trigger the envelope.
    /// Always seeks, even if the computed delta is small, because the previous playback may have
    /// advanced the decoder since the last seek.
    pub fn start(&mut self, media_index: i32, target_position: f64) {
        if let Some(d) = self.audio_decoder.as_mut() {
            d.stop();
            let _ = d.set_position(target_position);
            d.play();
        }
        if let Some(d) = self.video_decoder.as_mut() {
            d.stop();
            let _ = d.set_position(target_position);
            d.play();
        }
        self.media_index = media_index;
        self.state = VoiceState::Playing;
        self.start_time = Instant::now();
        self.last_observed_position = target_position;
        self.envelope.trigger();
    }

    /// Capture the current playhead into `params.playhead_position`, command the decoders to
    /// stop, and begin the envelope release. The captured value survives even after the decoder
    /// reports itself stopped (the "frozen playhead" property, P4).
    pub fn stop(&mut self) {
        self.params.playhead_position = self.capture_position();
        if let Some(d) = self.audio_decoder.as_mut() {
            d.stop();
        }
        if let Some(d) = self.video_decoder.as_mut() {
            d.stop();
        }
        self.envelope.release();
        self.state = VoiceState::Releasing;
    }

    /// Force this voice back to `FREE` without fading. Used when a slot is torn down or the pool
    /// reclaims a fully-released voice.
    pub fn reclaim(&mut self) {
        self.envelope.reset();
        self.audio_decoder = None;
        self.video_decoder = None;
        self.state = VoiceState::Free;
        self.media_index = -1;
    }

    /// Position capture policy: prefer, in order, a playing decoder's position, then the
    /// stored `playhead_position`, then a stopped decoder's position. The first candidate whose
    /// magnitude exceeds [`POSITION_VALID_THRESHOLD`] wins.
    pub fn capture_position(&self) -> f64 {
        if let Some(d) = &self.audio_decoder {
            if d.is_playing() {
                let p = d.position();
                if p > POSITION_VALID_THRESHOLD {
                    return p;
                }
            }
        }
        if let Some(d) = &self.video_decoder {
            if d.is_playing() {
                let p = d.position();
                if p > POSITION_VALID_THRESHOLD {
                    return p;
                }
            }
        }
        if self.params.playhead_position > POSITION_VALID_THRESHOLD {
            return self.params.playhead_position;
        }
        if let Some(d) = &self.audio_decoder {
            let p = d.position();
            if p > POSITION_VALID_THRESHOLD {
                return p;
            }
        }
        if let Some(d) = &self.video_decoder {
            let p = d.position();
            if p > POSITION_VALID_THRESHOLD {
                return p;
            }
        }
        0.0
    }

    /// Seek the audio/video decoders to `position`, skipping the seek when the decoder already
    /// reports a position within [`POSITION_SEEK_THRESHOLD`] (video seeks are expensive on
    /// compressed formats).
    pub fn seek_if_needed(&mut self, position: f64) {
        if let Some(d) = self.audio_decoder.as_mut() {
            if (d.position() - position).abs() >= POSITION_SEEK_THRESHOLD {
                let _ = d.set_position(position);
            }
        }
        if let Some(d) = self.video_decoder.as_mut() {
            if (d.position() - position).abs() >= POSITION_SEEK_THRESHOLD {
                let _ = d.set_position(position);
            }
        }
        self.apply_backward_loop_wrap_correction();
    }

    /// Corrects spurious position wraps that occur when an audio decoder plays backwards
    /// (`speed < 0`) under looping: the raw position can wrap via unsigned underflow inside the
    /// decoder.
    fn apply_backward_loop_wrap_correction(&mut self) {
        if self.params.speed >= 0.0 || !self.params.loop_enabled {
            return;
        }
        let Some(d) = self.audio_decoder.as_mut() else {
            return;
        };
        let pos = d.position();
        let last = self.last_observed_position;

        if pos > 1.0 {
            let wrapped = pos.fract();
            let _ = d.set_position(wrapped);
            rt_debug!("backward-loop wrap correction: {pos} > 1.0, reseeking to {wrapped}");
        } else if pos > 0.9 && last < 0.1 && last > 0.0 {
            let _ = d.set_position(0.99);
            rt_debug!("backward-loop spurious wrap detected, reseeking to 0.99");
        } else if pos <= POSITION_SEEK_THRESHOLD && last > POSITION_SEEK_THRESHOLD {
            let _ = d.set_position(0.99);
            rt_debug!("backward-loop intended wrap, reseeking to 0.99");
        }

        self.last_observed_position = d.position();
    }

    /// Observed position the supervisor should use this tick (updates the wrap-correction
    /// history).
    pub fn observe_position(&mut self) -> f64 {
        let pos = self.capture_position();
        self.last_observed_position = pos;
        pos
    }

    /// Pull `frames * channels` interleaved samples, applying the envelope per-frame. Returns
    /// `true` if the voice transitioned to idle (and should be reclaimed) during this buffer; the
    /// remaining frames in that case are silence, and the idle transition is only observed after
    /// the whole buffer has been emitted.
    pub fn pull_audio(&mut self, out: &mut [f32], channels: usize, sample_rate: f32) -> bool {
        if self.state == VoiceState::Free || !self.params.audio_enabled {
            out.fill(0.0);
            return false;
        }

        let frames = out.len() / channels;
        if let Some(d) = self.audio_decoder.as_mut() {
            d.read_block(out, channels);
        } else {
            out.fill(0.0);
        }

        let mut went_idle = false;
        for f in 0..frames {
            let gain = self.envelope.process_sample(sample_rate) * self.params.volume;
            for ch in 0..channels {
                out[f * channels + ch] *= gain;
            }
            if !self.envelope.is_active() {
                went_idle = true;
            }
        }
        went_idle
    }

    /// Advance the video decoder and expose its latest frame, or `None` if this voice should
    /// contribute nothing this tick (FREE, `video_enabled == false`, or loaded-but-not-yet-played
    /// with a position at or below [`POSITION_VALID_THRESHOLD`]).
    pub fn pull_video(&mut self) -> Option<crate::decoder::VideoFrameHandle> {
        if self.state == VoiceState::Free || !self.params.video_enabled {
            return None;
        }
        let d = self.video_decoder.as_mut()?;
        if !d.is_playing() && d.position() <= POSITION_VALID_THRESHOLD {
            return None;
        }
        d.pull_frame()
    }

    pub fn audio_position(&self) -> f64 {
        self.audio_decoder.as_ref().map(|d| d.position()).unwrap_or(0.0)
    }

    /// Total media duration in seconds, if the bound decoder can report one. Used by the
    /// Playback Supervisor to compute loop bounds in absolute seconds.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.audio_decoder
            .as_ref()
            .and_then(|d| d.duration_seconds())
            .or_else(|| self.video_decoder.as_ref().and_then(|d| d.duration_seconds()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fake::FakeDecoder;

    #[test]
    fn starting_a_voice_makes_it_playing_and_triggers_envelope() {
        let mut v = Voice::new(Instant::now());
        v.bind_decoders(Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))), None);
        v.start(0, 0.0);
        assert_eq!(v.state, VoiceState::Playing);
        assert!(v.envelope.is_active());
    }

    #[test]
    fn stop_captures_position_and_releases() {
        let mut v = Voice::new(Instant::now());
        v.bind_decoders(Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))), None);
        v.start(0, 0.0);
        let mut buf = [0.0f32; 500];
        v.pull_audio(&mut buf, 1, 1000.0);
        v.stop();
        assert_eq!(v.state, VoiceState::Releasing);
        let captured = v.params.playhead_position;
        assert!(captured > 0.0);
        // Frozen playhead: further queries don't change after the decoder is stopped.
        assert_eq!(v.params.playhead_position, captured);
    }

    #[test]
    fn free_voice_emits_silence_and_no_video() {
        let mut v = Voice::new(Instant::now());
        let mut buf = [1.0f32; 16];
        let went_idle = v.pull_audio(&mut buf, 2, 44100.0);
        assert!(!went_idle);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert!(v.pull_video().is_none());
    }
}
