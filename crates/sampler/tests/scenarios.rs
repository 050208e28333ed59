//! End-to-end scenarios (S1-S7) against the in-memory `FakeDecoder`.

use std::time::Duration;

use sampler_core::config::SamplerConfig;
use sampler_core::decoder::fake::FakeDecoder;
use sampler_core::module::{ModuleMode, PlayStyle};
use sampler_core::voice_pool::PolyphonyMode;
use sampler_core::{SamplerModule, TriggerEvent};

fn bind_fake(module: &mut SamplerModule, voice_index: usize, duration_seconds: f64) {
    module.voices_mut_for_test().get_mut(voice_index).bind_decoders(
        Some(Box::new(FakeDecoder::new(duration_seconds, 1000, 1, 440.0))),
        None,
    );
}

fn tick(module: &mut SamplerModule) {
    module.control_tick();
    module.supervisor_tick();
}

#[test]
fn s1_single_once_trigger_runs_then_goes_idle() {
    let (mut module, mut producer) = SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Once));
    bind_fake(&mut module, 0, 2.0);

    producer.try_enqueue(&TriggerEvent::new(0, 0, 0.0));
    tick(&mut module);
    assert_eq!(module.mode(), ModuleMode::Playing);

    // Advance the fake decoder to the end of its media by pulling audio repeatedly.
    let mut buf = vec![0.0f32; 2000];
    for _ in 0..5 {
        module.pull_audio(&mut buf, 1);
        tick(&mut module);
    }

    assert_eq!(module.mode(), ModuleMode::Idle);
}

#[test]
fn s2_gate_stop_freezes_playhead() {
    let (mut module, mut producer) =
        SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Next));
    bind_fake(&mut module, 0, 2.0);

    producer.try_enqueue(&TriggerEvent::new(0, 0, 0.5));
    tick(&mut module);

    module.advance_scheduled_stops_for_test(Duration::from_millis(600));
    tick(&mut module);

    assert!(module.voices_mut_for_test().get(0).state != sampler_core::voice::VoiceState::Playing);
}

#[test]
fn s3_mono_retrigger_keeps_one_voice_active() {
    let (mut module, mut producer) =
        SamplerModule::new(SamplerConfig::new().voice_count(4).polyphony_mode(PolyphonyMode::Mono));
    bind_fake(&mut module, 0, 2.0);
    bind_fake(&mut module, 1, 2.0);
    bind_fake(&mut module, 2, 2.0);
    bind_fake(&mut module, 3, 2.0);

    producer.try_enqueue(&TriggerEvent::new(0, 0, 0.0));
    tick(&mut module);
    producer.try_enqueue(&TriggerEvent::new(1, 0, 0.0));
    tick(&mut module);

    let active = module
        .voices_mut_for_test()
        .active_voices()
        .filter(|v| v.state == sampler_core::voice::VoiceState::Playing)
        .count();
    assert!(active <= 1);
}

#[test]
fn s4_poly_overlap_allows_two_concurrent_voices() {
    let (mut module, mut producer) =
        SamplerModule::new(SamplerConfig::new().voice_count(4).polyphony_mode(PolyphonyMode::Poly));
    bind_fake(&mut module, 0, 2.0);
    bind_fake(&mut module, 1, 2.0);
    bind_fake(&mut module, 2, 2.0);
    bind_fake(&mut module, 3, 2.0);

    producer.try_enqueue(&TriggerEvent::new(0, 0, 0.0));
    tick(&mut module);
    producer.try_enqueue(&TriggerEvent::new(1, 1, 0.0));
    tick(&mut module);

    let active = module.voices_mut_for_test().active_count();
    assert_eq!(active, 2);
}

#[test]
fn s5_loop_region_stays_playing_until_gate_expires() {
    let (mut module, mut producer) =
        SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Loop));
    bind_fake(&mut module, 0, 4.0);

    producer.try_enqueue(
        &TriggerEvent::new(0, 0, 2.0)
            .with_param("region_start", 0.25)
            .with_param("region_end", 0.75)
            .with_param("loop_size", 0.25),
    );
    tick(&mut module);
    assert_eq!(module.mode(), ModuleMode::Playing);

    module.advance_scheduled_stops_for_test(Duration::from_millis(2100));
    tick(&mut module);
    assert!(module.voices_mut_for_test().get(0).state != sampler_core::voice::VoiceState::Playing);
}

#[test]
fn s6_next_position_memory_resumes_from_captured_position() {
    let (mut module, mut producer) =
        SamplerModule::new(SamplerConfig::new().play_style(PlayStyle::Next));
    bind_fake(&mut module, 0, 2.0);

    producer.try_enqueue(&TriggerEvent::new(0, 0, 0.3));
    tick(&mut module);
    module.advance_scheduled_stops_for_test(Duration::from_millis(400));
    tick(&mut module);

    let captured = module.voices_mut_for_test().get(0).params.playhead_position;
    assert!(captured > 0.0);

    bind_fake(&mut module, 0, 2.0);
    producer.try_enqueue(&TriggerEvent::new(1, 0, 0.0));
    tick(&mut module);

    let start_position = module.voices_mut_for_test().get(0).params.start_position;
    let expected = if (0.001..0.999).contains(&captured) {
        captured
    } else {
        0.0
    };
    assert!((start_position - expected).abs() < 1e-6);
}

#[test]
fn s7_voice_stealing_under_load() {
    let (mut module, mut producer) =
        SamplerModule::new(SamplerConfig::new().voice_count(4).polyphony_mode(PolyphonyMode::Poly));
    for i in 0..5 {
        bind_fake(&mut module, i.min(3), 2.0);
    }

    for i in 0..5 {
        producer.try_enqueue(&TriggerEvent::new(i, i, 0.0));
        tick(&mut module);
    }

    assert_eq!(module.voices_mut_for_test().len(), 4);
    assert!(module.voices_mut_for_test().active_count() <= 4);

    // The oldest trigger (media_index 0, started first and so holding the smallest
    // `start_time`) is the one the 5th trigger steals; it should no longer hold any voice,
    // while the newest trigger's media (4) should now occupy a voice.
    let still_holds_oldest = module
        .voices_mut_for_test()
        .active_voices()
        .any(|v| v.media_index == 0);
    assert!(!still_holds_oldest);

    let holds_newest = module
        .voices_mut_for_test()
        .active_voices()
        .any(|v| v.media_index == 4);
    assert!(holds_newest);
}
