//! Property-based tests for the engine's core invariants, run against `FakeDecoder`.

use proptest::prelude::*;

use sampler_core::config::SamplerConfig;
use sampler_core::decoder::fake::FakeDecoder;
use sampler_core::module::{ModuleMode, PlayStyle};
use sampler_core::voice::VoiceState;
use sampler_core::voice_pool::PolyphonyMode;
use sampler_core::{SamplerModule, TriggerEvent};

proptest! {
    // module.mode == Playing iff at least one voice is non-FREE, or the queue is non-empty.
    #[test]
    fn module_mode_tracks_voice_activity(media in 0i32..4, duration in 0.0f32..1.0) {
        let (mut module, mut producer) = SamplerModule::new(SamplerConfig::new().voice_count(4));
        for i in 0..4 {
            module.voices_mut_for_test().get_mut(i).bind_decoders(
                Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))),
                None,
            );
        }
        producer.try_enqueue(&TriggerEvent::new(0, media, duration));
        module.control_tick();
        module.supervisor_tick();

        let any_active = module.voices_mut_for_test().active_count() > 0;
        prop_assert_eq!(module.mode() == ModuleMode::Playing, any_active);
    }

    // under MONO, at most one voice per media index is non-FREE.
    #[test]
    fn mono_polyphony_keeps_one_voice_per_media_index(a in 0i32..2, b in 0i32..2) {
        let (mut module, mut producer) =
            SamplerModule::new(SamplerConfig::new().voice_count(4).polyphony_mode(PolyphonyMode::Mono));
        for i in 0..4 {
            module.voices_mut_for_test().get_mut(i).bind_decoders(
                Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))),
                None,
            );
        }

        producer.try_enqueue(&TriggerEvent::new(0, a, 0.0));
        module.control_tick();
        producer.try_enqueue(&TriggerEvent::new(1, b, 0.0));
        module.control_tick();

        let playing_for_a = module
            .voices_mut_for_test()
            .active_voices()
            .filter(|v| v.media_index == a && v.state == VoiceState::Playing)
            .count();
        prop_assert!(playing_for_a <= 1);
    }

    // region swap — an inverted region is normalized to (end, start) before use.
    #[test]
    fn inverted_region_is_normalized_before_use(rs in 0.0f64..1.0, re in 0.0f64..1.0) {
        let (mut module, mut producer) =
            SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Once));
        module.voices_mut_for_test().get_mut(0).bind_decoders(
            Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))),
            None,
        );
        producer.try_enqueue(
            &TriggerEvent::new(0, 0, 0.0)
                .with_param("region_start", rs as f32)
                .with_param("region_end", re as f32),
        );
        module.control_tick();

        let voice = module.voices_mut_for_test().get(0);
        prop_assert!(voice.params.region_start <= voice.params.region_end);
    }

    // envelope gain is always within [0, 1].
    #[test]
    fn envelope_gain_stays_within_unit_range(attack in 0.0f32..50.0, sustain in 0.0f32..1.0, release in 0.0f32..50.0) {
        let mut env = sampler_core::envelope::Envelope::new();
        env.set_attack_ms(attack);
        env.set_sustain_level(sustain);
        env.set_release_ms(release);
        env.trigger();
        for i in 0..200 {
            let g = env.process_sample(44100.0);
            prop_assert!((0.0..=1.0).contains(&g));
            if i == 100 {
                env.release();
            }
        }
    }

    // once a voice is stopped, its captured playhead position never changes afterwards,
    // regardless of how many further samples are pulled or positions observed.
    #[test]
    fn playhead_freezes_after_stop(
        play_frames in 1u64..800,
        post_stop_pulls in 0u32..5,
    ) {
        use sampler_core::decoder::fake::FakeDecoder;
        use sampler_core::voice::{Voice, VoiceState};
        use std::time::Instant;

        let mut voice = Voice::new(Instant::now());
        voice.bind_decoders(Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))), None);
        voice.start(0, 0.0);

        let mut buf = vec![0.0f32; play_frames as usize];
        voice.pull_audio(&mut buf, 1, 1000.0);
        voice.stop();
        prop_assert_eq!(voice.state, VoiceState::Releasing);

        let frozen = voice.params.playhead_position;
        for _ in 0..post_stop_pulls {
            let mut buf = vec![0.0f32; 64];
            voice.pull_audio(&mut buf, 1, 1000.0);
            prop_assert_eq!(voice.params.playhead_position, frozen);
        }
        prop_assert_eq!(voice.params.playhead_position, frozen);
    }

    // under NEXT, a new trigger's resolved start position is the region-relative mapping of
    // the prior voice's captured absolute position, clamped to [0, 1].
    #[test]
    fn next_position_memory_maps_captured_position(pulled_frac in 0.05f64..0.9) {
        let (mut module, mut producer) =
            SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Next));
        module.voices_mut_for_test().get_mut(0).bind_decoders(
            Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))),
            None,
        );

        producer.try_enqueue(&TriggerEvent::new(0, 0, 0.0));
        module.control_tick();

        // Pull enough frames that the decoder's position reaches `pulled_frac` of its 2000-frame
        // length (duration_seconds=2.0 at sample_rate=1000).
        let total_frames = 2000u64;
        let target_frames = (pulled_frac * total_frames as f64) as usize;
        let mut buf = vec![0.0f32; target_frames];
        module.pull_audio(&mut buf, 1);

        let captured = module.voices_mut_for_test().get(0).capture_position();
        prop_assert!((captured - pulled_frac).abs() < 0.01);

        module.voices_mut_for_test().get_mut(0).stop();
        module.voices_mut_for_test().get_mut(0).bind_decoders(
            Some(Box::new(FakeDecoder::new(2.0, 1000, 1, 440.0))),
            None,
        );
        producer.try_enqueue(&TriggerEvent::new(1, 0, 0.0));
        module.control_tick();

        let start_position = module.voices_mut_for_test().get(0).params.start_position;
        let expected = if (0.001..0.999).contains(&captured) { captured } else { 0.0 };
        prop_assert!((start_position - expected).abs() < 1e-6);
    }

    // a gated trigger's voice stops within one control-tick window of its scheduled deadline,
    // never before it.
    #[test]
    fn scheduled_stop_fires_at_its_deadline(gate_ms in 10u64..500) {
        let (mut module, mut producer) =
            SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Once));
        module.voices_mut_for_test().get_mut(0).bind_decoders(
            Some(Box::new(FakeDecoder::new(10.0, 1000, 1, 440.0))),
            None,
        );

        producer.try_enqueue(&TriggerEvent::new(0, 0, gate_ms as f32 / 1000.0));
        module.control_tick();
        module.supervisor_tick();
        prop_assert_eq!(
            module.voices_mut_for_test().get(0).state,
            sampler_core::voice::VoiceState::Playing
        );

        // Not yet at the deadline: still playing.
        module.advance_scheduled_stops_for_test(std::time::Duration::from_millis(gate_ms / 2));
        module.supervisor_tick();
        prop_assert_eq!(
            module.voices_mut_for_test().get(0).state,
            sampler_core::voice::VoiceState::Playing
        );

        // Past the deadline: stopped.
        module.advance_scheduled_stops_for_test(std::time::Duration::from_millis(gate_ms));
        module.supervisor_tick();
        prop_assert_ne!(
            module.voices_mut_for_test().get(0).state,
            sampler_core::voice::VoiceState::Playing
        );
    }

    // a LOOP voice that crosses its loop-end boundary wraps back into its loop region and
    // remains PLAYING rather than stopping.
    #[test]
    fn loop_wraps_without_leaving_playing(loop_size in 0.05f64..0.4, start in 0.0f64..0.5) {
        let (mut module, _producer) =
            SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Loop));
        {
            let voice = module.voices_mut_for_test().get_mut(0);
            voice.bind_decoders(Some(Box::new(FakeDecoder::new(4.0, 1000, 1, 440.0))), None);
            voice.params.region_start = 0.0;
            voice.params.region_end = 1.0;
            voice.params.loop_size = loop_size;
            voice.params.loop_enabled = true;
            voice.params.start_position = start;
            voice.start(0, start);
        }

        for _ in 0..20 {
            module.supervisor_tick();
            prop_assert_eq!(
                module.voices_mut_for_test().get(0).state,
                sampler_core::voice::VoiceState::Playing
            );
        }
    }

    // enqueuing a trigger event from the producer side never allocates on the heap — the
    // conversion to the fixed-layout `RtTriggerEvent` and the ring write are both heap-free by
    // construction (the queue is preallocated at `SamplerModule::new`, and `RtTriggerEvent` is
    // `Copy`/`bytemuck::Pod`, a plain fixed-size value with no owned heap buffers). This is
    // asserted structurally rather than measured, since the producer-side API type itself rules
    // out allocation regardless of the values plugged in.
    #[test]
    fn rt_trigger_event_carries_no_heap_allocation(
        step in -100i32..100,
        media in -1i32..8,
        duration in 0.0f32..5.0,
    ) {
        fn assert_plain_old_data<T: bytemuck::Pod>() {}
        assert_plain_old_data::<sampler_core::trigger::RtTriggerEvent>();

        let ev = TriggerEvent::new(step, media, duration);
        let (rt_event, _unknown) = ev.to_rt_event();
        prop_assert_eq!(std::mem::size_of_val(&rt_event), std::mem::size_of::<sampler_core::trigger::RtTriggerEvent>());
    }
}
