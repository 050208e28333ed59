//! Playback Supervisor: advances positions, detects region/loop boundaries, applies
//! per-play-style end behaviour, and expires gate timers. Runs once per visual frame, after the
//! Control Tick.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::config::POSITION_BOUNDARY_THRESHOLD_DEFAULT;
use crate::module::{PlayStyle, SamplerModule};
use crate::voice::VoiceState;

pub(crate) fn run(module: &mut SamplerModule) {
    let play_style = module.play_style;

    for voice_index in 0..module.voices.len() {
        if module.voices.get(voice_index).state != VoiceState::Playing {
            continue;
        }
        step_voice(module.voices.get_mut(voice_index), play_style);
    }

    expire_scheduled_stops(module);

    let playing = module.voices.active_count() > 0 || module.queue_reader_mut().available() > 0;
    module
        .counters
        .mode_is_playing
        .store(playing, Ordering::Relaxed);
}

fn step_voice(voice: &mut crate::voice::Voice, play_style: PlayStyle) {
    let position = voice.observe_position();

    let region_start = voice.params.region_start;
    let region_end = voice.params.region_end;
    let start_position_rel = voice.params.start_position;
    let loop_size = voice.params.loop_size;
    let total_seconds = voice.duration_seconds();

    let loop_start_abs = region_start + start_position_rel * (region_end - region_start);

    let loop_end_abs = match play_style {
        PlayStyle::Once | PlayStyle::Next => region_end,
        PlayStyle::Loop | PlayStyle::Grain => match total_seconds {
            Some(total) if total > 0.0 => {
                // Compute in absolute seconds first to avoid losing precision on long samples,
                // then convert back to normalized.
                let loop_start_seconds = loop_start_abs * total;
                let region_end_seconds = region_end * total;
                let loop_end_seconds = (loop_start_seconds + loop_size)
                    .min(region_end_seconds)
                    .min(total);
                loop_end_seconds / total
            }
            _ => region_end,
        },
    };

    let epsilon = match total_seconds {
        Some(total) if total > 0.0 => (0.001 / total).max(POSITION_BOUNDARY_THRESHOLD_DEFAULT),
        _ => POSITION_BOUNDARY_THRESHOLD_DEFAULT,
    };

    if position < region_start - epsilon {
        voice.seek_if_needed(region_start);
        return;
    }

    match play_style {
        PlayStyle::Loop | PlayStyle::Grain => {
            if position < loop_start_abs - epsilon {
                voice.seek_if_needed(loop_start_abs);
            } else if position >= loop_end_abs - epsilon {
                voice.seek_if_needed(loop_start_abs);
            }
        }
        PlayStyle::Once => {
            if position >= loop_end_abs - epsilon {
                voice.stop();
                voice.params.playhead_position = 0.0;
            }
        }
        PlayStyle::Next => {
            if position >= loop_end_abs - epsilon {
                // Playhead is preserved so the next trigger's position memory can read it.
                voice.stop();
            }
        }
    }
}

fn expire_scheduled_stops(module: &mut SamplerModule) {
    let now = Instant::now();
    let play_style = module.play_style;

    let (expired, remaining): (Vec<_>, Vec<_>) = module
        .scheduled_stops
        .drain(..)
        .partition(|s| s.deadline <= now);
    module.scheduled_stops = remaining;

    for stop in expired {
        let voice = module.voices.get_mut(stop.voice_index);
        if voice.state != VoiceState::Free {
            voice.stop();
            if matches!(play_style, PlayStyle::Loop) {
                voice.params.playhead_position = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::decoder::fake::FakeDecoder;

    #[test]
    fn once_voice_stops_past_region_end() {
        let (mut module, _producer) = SamplerModule::new(SamplerConfig::new());
        module.play_style = PlayStyle::Once;
        {
            let voice = module.voices.get_mut(0);
            voice.bind_decoders(Some(Box::new(FakeDecoder::new(1.0, 1000, 1, 440.0))), None);
            voice.params.region_start = 0.0;
            voice.params.region_end = 1.0;
            voice.start(0, 0.99);
        }
        run(&mut module);
        assert_eq!(module.voices.get(0).state, crate::voice::VoiceState::Releasing);
    }

    #[test]
    fn loop_voice_wraps_to_loop_start_past_loop_end() {
        let (mut module, _producer) = SamplerModule::new(SamplerConfig::new());
        module.play_style = PlayStyle::Loop;
        {
            let voice = module.voices.get_mut(0);
            voice.bind_decoders(Some(Box::new(FakeDecoder::new(4.0, 1000, 1, 440.0))), None);
            voice.params.region_start = 0.0;
            voice.params.region_end = 1.0;
            voice.params.loop_size = 0.25;
            voice.start(0, 0.3);
        }
        run(&mut module);
        assert_eq!(module.voices.get(0).state, crate::voice::VoiceState::Playing);
    }

    #[test]
    fn scheduled_stop_expires_and_stops_voice() {
        let (mut module, _producer) = SamplerModule::new(SamplerConfig::new());
        {
            let voice = module.voices.get_mut(0);
            voice.bind_decoders(Some(Box::new(FakeDecoder::new(4.0, 1000, 1, 440.0))), None);
            voice.start(0, 0.0);
        }
        module.scheduled_stops.push(crate::module::ScheduledStop {
            voice_index: 0,
            deadline: Instant::now() - std::time::Duration::from_millis(1),
        });
        run(&mut module);
        assert_eq!(module.voices.get(0).state, crate::voice::VoiceState::Releasing);
    }
}
