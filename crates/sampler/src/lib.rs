//! Core voice engine for a polyphonic audio/video sampler.
//!
//! The module receives timed trigger events from a sequencer over a lock-free queue, allocates
//! playback voices from a bounded pool, drives sample-accurate envelopes from the audio callback,
//! and mixes the active voices into a single audio output and single video output. See
//! [`module::SamplerModule`] for the entry point.

pub mod config;
mod control_tick;
pub mod decoder;
pub mod envelope;
pub mod error;
pub mod is_audio_thread;
pub mod logging;
pub mod media_slot;
mod mixer;
pub mod module;
pub mod param;
pub mod persistence;
mod supervisor;
pub mod trigger;
pub mod voice;
pub mod voice_pool;

pub use error::{Error, Result};
pub use is_audio_thread::mark_audio_thread;
pub use module::{ModuleMode, PlayStyle, SamplerModule, TriggerProducer};
pub use trigger::TriggerEvent;
pub use voice_pool::PolyphonyMode;

/// Call once at startup, off the audio thread, so the realtime logging background thread is
/// already running before the first `rt_*!` call from a real-time callback.
pub fn init() {
    logging::ensure_log_ctx();
}
