//! Voice Pool: fixed-size array of voices, allocated free-first with LRU-stealing fallback.

use std::time::Instant;

use crate::voice::{Voice, VoiceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PolyphonyMode {
    Mono,
    Poly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealingStrategy {
    Lru,
    Oldest,
}

pub struct VoicePool {
    voices: Vec<Voice>,
    pub stealing_strategy: StealingStrategy,
    pub polyphony_mode: PolyphonyMode,
}

impl VoicePool {
    pub fn new(voice_count: usize, polyphony_mode: PolyphonyMode) -> Self {
        let now = Instant::now();
        Self {
            voices: (0..voice_count).map(|_| Voice::new(now)).collect(),
            stealing_strategy: StealingStrategy::Lru,
            polyphony_mode,
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get(&self, index: usize) -> &Voice {
        &self.voices[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Voice {
        &mut self.voices[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }

    /// Allocation algorithm: first free voice, else the `PLAYING` voice with the smallest
    /// `start_time` (LRU steal). `None` if every voice is `RELEASING`.
    pub fn allocate(&self) -> Option<usize> {
        if let Some(i) = self.voices.iter().position(Voice::is_free) {
            return Some(i);
        }

        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.state == VoiceState::Playing)
            .min_by_key(|(_, v)| v.start_time)
            .map(|(i, _)| i)
    }

    pub fn has_free(&self) -> bool {
        self.voices.iter().any(Voice::is_free)
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_free()).count()
    }

    pub fn active_voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter().filter(|v| !v.is_free())
    }

    /// Find a non-`FREE` voice currently playing `media_index`, if any (used by `MONO` retrigger
    /// logic and the P3 invariant).
    pub fn find_playing(&self, media_index: i32) -> Option<usize> {
        self.voices
            .iter()
            .position(|v| !v.is_free() && v.media_index == media_index)
    }
}
