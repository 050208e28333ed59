//! `SamplerModule`: the façade that wires the Media Slot Table, Voice Pool, Trigger Queue,
//! Control Tick, and Playback Supervisor into the single component a host embeds.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{MAX_EVENTS_PER_TICK, TRIGGER_QUEUE_MIN_CAPACITY};
use crate::control_tick;
use crate::decoder::SymphoniaAudioDecoder;
use crate::error::Result;
use crate::logging::{rt_debug, RateLimiter};
use crate::media_slot::MediaSlotTable;
use crate::supervisor;
use crate::trigger::{RtTriggerEvent, TriggerEvent};
use crate::voice_pool::{PolyphonyMode, VoicePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PlayStyle {
    Once,
    Loop,
    Grain,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMode {
    Idle,
    Playing,
}

/// A pending gated stop: `{voice_ref, deadline_wallclock}`.
pub(crate) struct ScheduledStop {
    pub voice_index: usize,
    pub deadline: Instant,
}

/// Shared atomics touched by both threads without locking.
pub(crate) struct SharedCounters {
    pub dropped_event_counter: AtomicU64,
    pub invalid_parameter_counter: AtomicU64,
    pub mode_is_playing: AtomicBool,
}

impl Default for SharedCounters {
    fn default() -> Self {
        Self {
            dropped_event_counter: AtomicU64::new(0),
            invalid_parameter_counter: AtomicU64::new(0),
            mode_is_playing: AtomicBool::new(false),
        }
    }
}

/// The producer handle, cloned to the audio thread. Enqueues events without allocating, locking,
/// or logging.
pub struct TriggerProducer {
    writer: sampler_sync::spsc_ring::RingWriter<RtTriggerEvent>,
    counters: Arc<SharedCounters>,
    backpressure_limiter: RateLimiter,
}

impl TriggerProducer {
    /// Convert and enqueue a trigger event. Returns `false` if the queue was full (the event is
    /// dropped and the shared drop counter incremented); never blocks or allocates.
    pub fn try_enqueue(&mut self, event: &TriggerEvent) -> bool {
        let (rt_event, _unknown) = event.to_rt_event();
        if self.writer.write_one(rt_event) {
            true
        } else {
            self.counters
                .dropped_event_counter
                .fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn size_approx(&mut self) -> usize {
        self.writer.available()
    }

    /// Backpressure check: log at most once per 5 seconds when the queue is more than half
    /// full. Safe to call from the audio thread; goes through the realtime logging ring.
    pub fn check_backpressure(&mut self, capacity: usize) {
        if self.size_approx() > capacity / 2
            && self
                .backpressure_limiter
                .should_emit(Duration::from_secs(crate::config::BACKPRESSURE_WARN_RATE_LIMIT_SECS))
        {
            rt_debug!("trigger queue backpressure: {} items queued", self.size_approx());
        }
    }
}

/// The top-level sampler module a host constructs and drives from two threads.
pub struct SamplerModule {
    pub(crate) slots: MediaSlotTable,
    pub(crate) voices: VoicePool,
    pub(crate) play_style: PlayStyle,
    pub(crate) scheduled_stops: Vec<ScheduledStop>,
    /// Index of the most recently started voice, used to resolve a "rest" event to a voice when
    /// none is given explicitly.
    pub(crate) active_voice_hint: Option<usize>,
    pub(crate) counters: Arc<SharedCounters>,
    queue_reader: sampler_sync::spsc_ring::RingReader<RtTriggerEvent>,
    queue_capacity: usize,
    sample_rate: f32,
    channels: usize,
    invalid_param_limiter: RateLimiter,
    /// Per-voice scratch buffer reused by [`crate::mixer::mix_audio`]; resized only when the
    /// requested output buffer length changes, never on the steady-state hot path.
    pub(crate) mix_scratch: Vec<f32>,
}

impl SamplerModule {
    pub fn new(config: crate::config::SamplerConfig) -> (Self, TriggerProducer) {
        let capacity = config.queue_capacity.max(TRIGGER_QUEUE_MIN_CAPACITY);
        let (reader, writer) = sampler_sync::spsc_ring::create_ring::<RtTriggerEvent>(capacity);
        let counters = Arc::new(SharedCounters::default());

        let module = Self {
            slots: MediaSlotTable::new(),
            voices: VoicePool::new(config.voice_count, config.polyphony_mode),
            play_style: config.play_style,
            scheduled_stops: Vec::new(),
            active_voice_hint: None,
            counters: counters.clone(),
            queue_reader: reader,
            queue_capacity: capacity,
            sample_rate: 44100.0,
            channels: 2,
            invalid_param_limiter: RateLimiter::new(),
            mix_scratch: Vec::new(),
        };

        let producer = TriggerProducer {
            writer,
            counters,
            backpressure_limiter: RateLimiter::new(),
        };

        (module, producer)
    }

    pub fn add_media(&mut self, audio_path: Option<&Path>, video_path: Option<&Path>) -> Result<usize> {
        self.slots.add(audio_path, video_path)
    }

    /// Overwrite slot `slot_index`'s stored parameters, used both by the Control Tick (to record
    /// each slot's most recently configured parameters) and by [`crate::persistence::restore`] (to
    /// reapply a saved snapshot).
    pub fn set_slot_parameters(
        &mut self,
        slot_index: usize,
        parameters: crate::persistence::ParametersSnapshot,
    ) {
        self.slots.set_parameters(slot_index, parameters);
    }

    pub fn polyphony_mode(&self) -> PolyphonyMode {
        self.voices.polyphony_mode
    }

    pub fn set_polyphony_mode(&mut self, mode: PolyphonyMode) {
        // Switching to MONO does not retroactively stop already-playing voices (resolved open
        // question); the new rule applies from the next trigger onward.
        self.voices.polyphony_mode = mode;
    }

    pub fn play_style(&self) -> PlayStyle {
        self.play_style
    }

    pub fn set_play_style(&mut self, style: PlayStyle) {
        self.play_style = style;
    }

    pub fn mode(&self) -> ModuleMode {
        if self.counters.mode_is_playing.load(Ordering::Relaxed) {
            ModuleMode::Playing
        } else {
            ModuleMode::Idle
        }
    }

    pub fn dropped_event_count(&self) -> u64 {
        self.counters.dropped_event_counter.load(Ordering::Relaxed)
    }

    pub fn invalid_parameter_count(&self) -> u64 {
        self.counters
            .invalid_parameter_counter
            .load(Ordering::Relaxed)
    }

    /// Build a decoder pair for `slot_index`, for use by the Control Tick when (re)starting a
    /// voice. Returns `None` if the slot has no audio path (video-only slots are not yet wired to
    /// a concrete decoder; no video decoder ships).
    pub(crate) fn open_decoder_for_slot(
        &self,
        slot_index: usize,
    ) -> Option<Box<dyn crate::decoder::MediaDecoder>> {
        let handle = self.slots.resolve(slot_index as i32)?;
        let path = handle.slot.audio_path.as_ref()?;
        SymphoniaAudioDecoder::open(path)
            .ok()
            .map(|d| Box::new(d) as Box<dyn crate::decoder::MediaDecoder>)
    }

    /// Run one Control Tick: drain up to [`MAX_EVENTS_PER_TICK`] queued trigger events and
    /// apply them. Call once per visual frame from the control thread.
    pub fn control_tick(&mut self) {
        control_tick::run(self, MAX_EVENTS_PER_TICK);
    }

    /// Run one Playback Supervisor pass. Call once per visual frame, immediately after
    /// [`SamplerModule::control_tick`].
    pub fn supervisor_tick(&mut self) {
        supervisor::run(self);
    }

    /// Mix and emit one block of interleaved audio.
    pub fn pull_audio(&mut self, out: &mut [f32], channels: usize) {
        crate::mixer::mix_audio(self, out, channels, self.sample_rate);
    }

    pub fn set_sample_rate(&mut self, sr: f32) {
        self.sample_rate = sr;
    }

    pub fn set_channels(&mut self, channels: usize) {
        self.channels = channels;
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Pull one video frame per currently-visible voice.
    pub fn pull_video(&mut self) -> Vec<crate::decoder::VideoFrameHandle> {
        crate::mixer::mix_video(self)
    }

    /// Direct voice-pool access for integration tests, which need to bind [`crate::decoder::fake::FakeDecoder`]
    /// instances and inspect voice state without a real decoder backend.
    #[cfg(any(test, feature = "test-util"))]
    pub fn voices_mut_for_test(&mut self) -> &mut VoicePool {
        &mut self.voices
    }

    /// Rewind every scheduled stop's deadline by `past`, so the next supervisor tick expires it
    /// deterministically instead of requiring the test to sleep in real time.
    #[cfg(any(test, feature = "test-util"))]
    pub fn advance_scheduled_stops_for_test(&mut self, past: Duration) {
        for stop in &mut self.scheduled_stops {
            stop.deadline = stop
                .deadline
                .checked_sub(past)
                .unwrap_or_else(Instant::now);
        }
    }

    pub(crate) fn queue_reader_mut(
        &mut self,
    ) -> &mut sampler_sync::spsc_ring::RingReader<RtTriggerEvent> {
        &mut self.queue_reader
    }

    /// Capacity the trigger queue was constructed with, for hosts driving
    /// [`TriggerProducer::check_backpressure`].
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub(crate) fn warn_invalid_parameter_rate_limited(&self, message: &str) {
        if self
            .invalid_param_limiter
            .should_emit(Duration::from_secs(crate::config::WARN_RATE_LIMIT_SECS))
        {
            log::warn!("{message}");
        }
        self.counters
            .invalid_parameter_counter
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for SamplerModule {
    /// Drains and discards any remaining queued events without side effects (resolved open
    /// question): no voice starts during teardown, the discarded count is logged at `debug`.
    fn drop(&mut self) {
        let mut discarded = 0u64;
        while self.queue_reader.read_one().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("dropped {discarded} queued trigger events on module teardown");
        }
    }
}
