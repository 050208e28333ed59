//! Media Slot Table: stable-index storage of loaded media.

use std::path::{Path, PathBuf};

use crate::decoder::SymphoniaAudioDecoder;
use crate::error::{Error, Result};
use crate::persistence::ParametersSnapshot;

/// A single addressable sample: audio-only, video-only, or a paired A/V slot.
///
/// `parameters` is the slot's last-configured playback parameters — seeded into a freshly bound
/// voice for this slot before any per-trigger overrides are applied, and what session persistence
/// saves/restores (see `persistence.rs`). It is distinct from any voice's own transient playhead
/// state, which is never persisted.
pub struct MediaSlot {
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub parameters: ParametersSnapshot,
}

impl MediaSlot {
    pub fn has_audio(&self) -> bool {
        self.audio_path.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_path.is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.has_audio() || self.has_video()
    }
}

/// A resolved, read-only view into a slot, returned by [`MediaSlotTable::resolve`].
pub struct SlotHandle<'a> {
    pub index: usize,
    pub slot: &'a MediaSlot,
}

/// Owns up to N loaded media entries. Mutated only from the control thread.
#[derive(Default)]
pub struct MediaSlotTable {
    slots: Vec<Option<MediaSlot>>,
}

impl MediaSlotTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Add a slot backed by `audio_path` and/or `video_path`. At least one must be `Some` and
    /// openable; an audio path that fails to open produces no slot.
    pub fn add(
        &mut self,
        audio_path: Option<&Path>,
        video_path: Option<&Path>,
    ) -> Result<usize> {
        // Validate that the audio path actually opens before committing a slot; the decoder
        // itself is discarded immediately, since playback always opens a fresh one per voice.
        if let Some(p) = audio_path {
            SymphoniaAudioDecoder::open(p)?;
        } else if video_path.is_none() {
            return Err(Error::DecoderOpen {
                path: "<none>".into(),
                message: "at least one of audio_path/video_path must be provided".into(),
            });
        }

        let slot = MediaSlot {
            audio_path: audio_path.map(Path::to_path_buf),
            video_path: video_path.map(Path::to_path_buf),
            parameters: ParametersSnapshot::default(),
        };
        self.slots.push(Some(slot));
        Ok(self.slots.len() - 1)
    }

    /// Batch-add with filename-stem pairing: paths sharing a stem become one slot with both
    /// audio and video. A file that fails to open drops only that file from the pairing attempt.
    pub fn pair_by_basename(&mut self, paths: &[PathBuf]) -> Vec<Result<usize>> {
        use std::collections::HashMap as Map;

        let mut by_stem: Map<String, (Option<PathBuf>, Option<PathBuf>)> = Map::new();
        for p in paths {
            let Some(stem) = p.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let entry = by_stem.entry(stem.to_owned()).or_default();
            if is_video_ext(p) {
                entry.1 = Some(p.clone());
            } else {
                entry.0 = Some(p.clone());
            }
        }

        let mut results = Vec::new();
        for (_, (audio, video)) in by_stem {
            results.push(self.add(audio.as_deref(), video.as_deref()));
        }
        results
    }

    /// Remove a slot. Does not affect any voice currently playing from it; the voice keeps its
    /// own decoder and simply cannot be re-selected.
    pub fn remove(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    /// Overwrite a slot's stored parameters. No-op if the index is empty or out of range.
    pub fn set_parameters(&mut self, index: usize, parameters: ParametersSnapshot) {
        if let Some(Some(slot)) = self.slots.get_mut(index) {
            slot.parameters = parameters;
        }
    }

    pub fn resolve(&self, index: i32) -> Option<SlotHandle<'_>> {
        if index < 0 {
            return None;
        }
        let slot = self.slots.get(index as usize)?.as_ref()?;
        if !slot.is_valid() {
            return None;
        }
        Some(SlotHandle {
            index: index as usize,
            slot,
        })
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ordered iteration over live slots, paired with their stable index. Used by persistence to
    /// build the on-disk snapshot.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &MediaSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }
}

fn is_video_ext(p: &Path) -> bool {
    matches!(
        p.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("mp4") | Some("mov") | Some("mkv") | Some("webm") | Some("avi")
    )
}
