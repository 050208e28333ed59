//! JSON session persistence: the slot table (including each slot's configured parameters),
//! active-slot hint, play style, and polyphony mode. Voice runtime state (playhead position,
//! envelope stage) is never persisted (Non-goals).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::module::{PlayStyle, SamplerModule};
use crate::voice_pool::PolyphonyMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersSnapshot {
    pub start_position: f64,
    pub region_start: f64,
    pub region_end: f64,
    pub speed: f32,
    pub volume: f32,
    pub loop_size: f64,
}

impl Default for ParametersSnapshot {
    fn default() -> Self {
        Self {
            start_position: 0.0,
            region_start: 0.0,
            region_end: 1.0,
            speed: 1.0,
            volume: 1.0,
            loop_size: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub parameters_snapshot: ParametersSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    pub slots: Vec<SlotSnapshot>,
    pub active_slot_hint: Option<i32>,
    pub play_style: PlayStyle,
    pub polyphony_mode: PolyphonyMode,
}

impl ModuleSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Persistence {
            message: e.to_string(),
        })
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Persistence {
            message: e.to_string(),
        })
    }
}

/// Build a snapshot of the given module's persistable state.
pub fn snapshot(module: &SamplerModule) -> ModuleSnapshot {
    let slots = module
        .slots
        .iter()
        .map(|(_, slot)| SlotSnapshot {
            audio_path: slot.audio_path.clone(),
            video_path: slot.video_path.clone(),
            parameters_snapshot: slot.parameters.clone(),
        })
        .collect();

    let active_slot_hint = module
        .active_voice_hint
        .map(|idx| module.voices.get(idx).media_index);

    ModuleSnapshot {
        slots,
        active_slot_hint,
        play_style: module.play_style,
        polyphony_mode: module.voices.polyphony_mode,
    }
}

/// Restore a module's slot table and mode fields from a snapshot. Slots are repopulated from
/// paths in snapshot order (decoder failures during restore drop that slot, matching the normal
/// `add` failure semantics, and leave the snapshot's other slots untouched); each successfully
/// added slot has its `parameters_snapshot` reapplied immediately, by the index `add_media`
/// actually assigned it. Voice runtime state is never persisted, so a restored slot's parameters
/// take effect the next time it is triggered, not on any already-playing voice.
pub fn restore(module: &mut SamplerModule, snapshot: &ModuleSnapshot) {
    for slot in &snapshot.slots {
        if let Ok(index) = module.add_media(slot.audio_path.as_deref(), slot.video_path.as_deref())
        {
            module.set_slot_parameters(index, slot.parameters_snapshot.clone());
        }
    }
    module.set_play_style(snapshot.play_style);
    module.set_polyphony_mode(snapshot.polyphony_mode);
}
