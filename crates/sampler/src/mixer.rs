//! Audio & Video Mix: linear-sum audio mixing and video frame composition across voices.

use std::mem;

use crate::decoder::VideoFrameHandle;
use crate::module::SamplerModule;

/// Mix every voice's audio pull into `out` (interleaved, `channels` wide). Mixing is a plain
/// linear sum; no automatic gain reduction. A voice transitioning to idle mid-buffer is reclaimed
/// only after its contribution has been fully mixed in.
///
/// The per-voice scratch buffer lives on `module` and is reused across calls — it is only resized
/// (and so only possibly reallocated) when `out.len()` differs from the previous call, never on
/// every steady-state audio-callback invocation.
pub(crate) fn mix_audio(module: &mut SamplerModule, out: &mut [f32], channels: usize, sample_rate: f32) {
    out.fill(0.0);
    let mut scratch = mem::take(&mut module.mix_scratch);
    if scratch.len() != out.len() {
        scratch.resize(out.len(), 0.0);
    }
    let mut to_reclaim = Vec::new();

    for voice_index in 0..module.voices.len() {
        let voice = module.voices.get_mut(voice_index);
        if voice.is_free() {
            continue;
        }
        let went_idle = voice.pull_audio(&mut scratch, channels, sample_rate);
        for (o, s) in out.iter_mut().zip(scratch.iter()) {
            *o += *s;
        }
        if went_idle {
            to_reclaim.push(voice_index);
        }
    }

    module.mix_scratch = scratch;

    for idx in to_reclaim {
        module.voices.get_mut(idx).reclaim();
    }
}

/// Pull one frame per currently-visible voice. Stopped voices contribute nothing; a voice that is
/// loaded-but-not-playing only contributes once its position has advanced past
/// [`crate::config::POSITION_VALID_THRESHOLD`] (keeps the first frame of a loaded, unplayed clip
/// visible for preview).
pub(crate) fn mix_video(module: &mut SamplerModule) -> Vec<VideoFrameHandle> {
    let mut frames = Vec::new();
    for voice_index in 0..module.voices.len() {
        let voice = module.voices.get_mut(voice_index);
        if voice.is_free() {
            continue;
        }
        if let Some(handle) = voice.pull_video() {
            frames.push(handle);
        }
    }
    frames
}
