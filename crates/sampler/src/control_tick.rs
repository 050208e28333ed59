//! Control Tick: the per-visual-frame consumer that drains the Trigger Queue and applies
//! position-memory, polyphony, and voice-allocation policy.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::config::MIN_REGION_SIZE;
use crate::module::PlayStyle;
use crate::module::{SamplerModule, ScheduledStop};
use crate::trigger::{ParamKey, RtTriggerEvent};
use crate::voice_pool::PolyphonyMode;

/// Drain up to `max_events` from the queue and apply each in FIFO order. The module-mode
/// transition to `Playing` happens once, after the whole tick, before the caller runs the
/// supervisor.
pub(crate) fn run(module: &mut SamplerModule, max_events: usize) {
    for _ in 0..max_events {
        let Some(event) = module.queue_reader_mut().read_one() else {
            break;
        };
        apply_event(module, event);
    }

    let queue_nonempty = module.queue_reader_mut().available() > 0;
    let playing = module.voices.active_count() > 0 || queue_nonempty;
    module
        .counters
        .mode_is_playing
        .store(playing, Ordering::Relaxed);
}

fn apply_event(module: &mut SamplerModule, event: RtTriggerEvent) {
    // Step 1 & rests: the Trigger Event's own `media_index` field is the source of truth. It's a
    // top-level, already-typed attribute of the event here, not a `parameters["note"]` lookup —
    // that extraction-from-event step belonged to the original event schema, not this one.
    if event.is_rest() {
        if let Some(voice_index) = module.active_voice_hint {
            if !module.voices.get(voice_index).is_free() {
                module.voices.get_mut(voice_index).stop();
            }
        }
        return;
    }

    // Step 2: validate.
    let slot_index = event.media_index;
    if module.slots.resolve(slot_index).is_none() {
        module.warn_invalid_parameter_rate_limited(&format!(
            "trigger referenced out-of-range or empty media slot {slot_index}"
        ));
        return;
    }

    // Step 3: polyphony action.
    let mut stop_target: Option<usize> = None;
    if module.voices.polyphony_mode == PolyphonyMode::Mono {
        if let Some(prev) = module.voices.find_playing(slot_index) {
            stop_target = Some(prev);
        } else if let Some(hint) = module.active_voice_hint {
            if !module.voices.get(hint).is_free() {
                stop_target = Some(hint);
            }
        }
    }
    if let Some(idx) = stop_target {
        module.voices.get_mut(idx).stop();
    }

    // Step 4: position memory.
    let mut region_start = event.get(ParamKey::RegionStart).map(|v| v as f64);
    let mut region_end = event.get(ParamKey::RegionEnd).map(|v| v as f64);
    let explicit_position = event.get(ParamKey::Position).map(|v| v as f64);

    let relative_start = if let Some(p) = explicit_position {
        p
    } else {
        match module.play_style {
            PlayStyle::Next => {
                // Position memory always comes from a prior voice playing *this same* slot,
                // independent of polyphony mode — in POLY mode `stop_target` is never set, and
                // `active_voice_hint` can point at a voice for an unrelated slot.
                let prior = module.voices.find_playing(slot_index);
                let captured = prior
                    .map(|idx| module.voices.get(idx).capture_position())
                    .unwrap_or(0.0);
                let normalized = if !(0.001..0.999).contains(&captured) {
                    0.0
                } else {
                    captured
                };
                map_absolute_to_region_relative(
                    normalized,
                    region_start.unwrap_or_else(|| {
                        prior
                            .map(|idx| module.voices.get(idx).params.region_start)
                            .unwrap_or(0.0)
                    }),
                    region_end.unwrap_or_else(|| {
                        prior
                            .map(|idx| module.voices.get(idx).params.region_end)
                            .unwrap_or(1.0)
                    }),
                )
            }
            PlayStyle::Once | PlayStyle::Grain | PlayStyle::Loop => stop_target
                .or(module.active_voice_hint)
                .map(|idx| module.voices.get(idx).params.start_position)
                .unwrap_or(0.0),
        }
    };

    // Step 5: cancel pending scheduled stops targeting the voice about to start.
    // (deferred until we know which voice index will be used, below)

    // Step 6: allocate.
    let Some(voice_index) = module.voices.allocate() else {
        module
            .counters
            .dropped_event_counter
            .fetch_add(1, Ordering::Relaxed);
        return;
    };

    module
        .scheduled_stops
        .retain(|s| s.voice_index != voice_index);

    // Step 7: apply parameters, clamped.
    let mut relative_start = relative_start.clamp(0.0, 1.0);
    if matches!(module.play_style, PlayStyle::Once) && relative_start >= 0.999 {
        relative_start = crate::config::ONCE_POSITION_CLAMP;
    }

    if let (Some(rs), Some(re)) = (region_start, region_end) {
        if rs > re {
            region_start = Some(re);
            region_end = Some(rs);
        }
    }

    let decoder = module.open_decoder_for_slot(slot_index as usize);
    let duration_seconds = decoder.as_ref().and_then(|d| d.duration_seconds());
    // Seed this slot's last-configured parameters as the baseline before applying any per-event
    // overrides, so a pooled voice previously used by a different slot doesn't leak that slot's
    // leftover region/speed/volume/loop_size into this trigger.
    let slot_defaults = module
        .slots
        .resolve(slot_index)
        .map(|h| h.slot.parameters.clone())
        .unwrap_or_default();
    let voice = module.voices.get_mut(voice_index);
    voice.bind_decoders(decoder, None);
    voice.params.region_start = slot_defaults.region_start;
    voice.params.region_end = slot_defaults.region_end;
    voice.params.speed = slot_defaults.speed;
    voice.params.volume = slot_defaults.volume;
    voice.params.loop_size = slot_defaults.loop_size;
    if let Some(rs) = region_start {
        voice.params.region_start = rs.clamp(0.0, 1.0);
    }
    if let Some(re) = region_end {
        voice.params.region_end = re.clamp(0.0, 1.0);
    }
    if let Some(speed) = event.get(ParamKey::Speed) {
        voice.params.speed = speed;
    }
    if let Some(volume) = event.get(ParamKey::Volume) {
        voice.params.volume = volume;
    }
    if let Some(loop_size) = event.get(ParamKey::LoopSize) {
        let max_loop = duration_seconds
            .unwrap_or(crate::config::MAX_LOOP_SIZE_SECONDS)
            .min(crate::config::MAX_LOOP_SIZE_SECONDS);
        voice.params.loop_size = (loop_size as f64).clamp(crate::config::MIN_LOOP_SIZE_SECONDS, max_loop);
    }
    voice.params.loop_enabled = matches!(module.play_style, PlayStyle::Loop | PlayStyle::Grain);
    voice.params.start_position = relative_start;

    // Step 8: start the voice at the absolute position.
    let region_width = voice.params.region_end - voice.params.region_start;
    let absolute_start = if region_width.abs() < MIN_REGION_SIZE {
        voice.params.region_start
    } else {
        voice.params.region_start + relative_start * region_width
    };
    voice.start(slot_index, absolute_start);
    let saved_params = voice.params.clone();

    module.set_slot_parameters(
        slot_index as usize,
        crate::persistence::ParametersSnapshot {
            start_position: saved_params.start_position,
            region_start: saved_params.region_start,
            region_end: saved_params.region_end,
            speed: saved_params.speed,
            volume: saved_params.volume,
            loop_size: saved_params.loop_size,
        },
    );

    module.active_voice_hint = Some(voice_index);

    // Step 9: schedule gate stop.
    if event.duration > 0.0 {
        module.scheduled_stops.push(ScheduledStop {
            voice_index,
            deadline: Instant::now() + Duration::from_secs_f32(event.duration),
        });
    }

    // Step 10: module mode -> playing (handled in `run`, after the whole tick).
}

fn map_absolute_to_region_relative(absolute: f64, region_start: f64, region_end: f64) -> f64 {
    let width = region_end - region_start;
    if width.abs() < MIN_REGION_SIZE {
        return 0.0;
    }
    ((absolute - region_start) / width).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::trigger::TriggerEvent;

    #[test]
    fn invalid_slot_index_is_dropped_without_panicking() {
        let (mut module, mut producer) = SamplerModule::new(SamplerConfig::new());
        let ev = TriggerEvent::new(0, 99, 0.0);
        producer.try_enqueue(&ev);
        module.control_tick();
        assert_eq!(module.invalid_parameter_count(), 1);
    }

    #[test]
    fn rest_with_no_prior_voice_is_a_no_op() {
        let (mut module, mut producer) = SamplerModule::new(SamplerConfig::new());
        let ev = TriggerEvent::rest(0);
        producer.try_enqueue(&ev);
        module.control_tick();
        assert_eq!(module.voices.active_count(), 0);
    }
}
