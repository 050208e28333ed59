//! Tunable constants for the voice engine.
//!
//! A small set of named constants rather than magic numbers scattered through the hot path.

/// Default number of voices in the pool.
pub const DEFAULT_MAX_VOICES: usize = 16;

/// Maximum number of trigger events drained from the queue in a single Control Tick.
pub const MAX_EVENTS_PER_TICK: usize = 100;

/// Minimum capacity of the trigger queue (audio thread -> control thread).
pub const TRIGGER_QUEUE_MIN_CAPACITY: usize = 512;

/// A captured position below this is treated as "not meaningfully playing" by the position
/// capture policy (see [`crate::voice::Voice::capture_position`]).
pub const POSITION_VALID_THRESHOLD: f64 = 0.001;

/// Seeks within this distance of the current decoder position are skipped, except at `start()`.
pub const POSITION_SEEK_THRESHOLD: f64 = 0.01;

/// Default normalized boundary epsilon used by the Playback Supervisor when `1ms / duration`
/// would be smaller than this (e.g. very long media).
pub const POSITION_BOUNDARY_THRESHOLD_DEFAULT: f64 = 0.0001;

/// Below this region width, region-relative math is considered degenerate and guarded.
pub const MIN_REGION_SIZE: f64 = 0.001;

/// Minimum allowed `loop_size`, in seconds.
pub const MIN_LOOP_SIZE_SECONDS: f64 = 0.001;

/// Maximum allowed `loop_size`, in seconds, independent of media duration.
pub const MAX_LOOP_SIZE_SECONDS: f64 = 10.0;

/// Position values at or above this, with no explicit `position` parameter under `ONCE`, are
/// clamped down so one sample can still play before region end.
pub const ONCE_POSITION_CLAMP: f64 = 0.999;

/// How often (in seconds) a given invalid-parameter-kind warning may be logged.
pub const WARN_RATE_LIMIT_SECS: u64 = 1;

/// How often (in seconds) the backpressure warning may be logged.
pub const BACKPRESSURE_WARN_RATE_LIMIT_SECS: u64 = 5;

/// Builder for a [`crate::module::SamplerModule`].
///
/// Rather than poking at fields directly, hosts configure a module through this struct and call
/// [`SamplerConfig::voice_count`] / [`SamplerConfig::queue_capacity`] etc. before construction.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub voice_count: usize,
    pub queue_capacity: usize,
    pub polyphony_mode: crate::voice_pool::PolyphonyMode,
    pub play_style: crate::module::PlayStyle,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            voice_count: DEFAULT_MAX_VOICES,
            queue_capacity: TRIGGER_QUEUE_MIN_CAPACITY,
            polyphony_mode: crate::voice_pool::PolyphonyMode::Mono,
            play_style: crate::module::PlayStyle::Once,
        }
    }
}

impl SamplerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voice_count(mut self, n: usize) -> Self {
        self.voice_count = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n.max(TRIGGER_QUEUE_MIN_CAPACITY);
        self
    }

    pub fn polyphony_mode(mut self, mode: crate::voice_pool::PolyphonyMode) -> Self {
        self.polyphony_mode = mode;
        self
    }

    pub fn play_style(mut self, style: crate::module::PlayStyle) -> Self {
        self.play_style = style;
        self
    }
}
