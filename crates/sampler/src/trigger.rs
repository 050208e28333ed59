//! Trigger event schema and the realtime-safe encoding that actually crosses the queue.
//!
//! [`TriggerEvent`] is the host-facing, string-keyed schema a sequencer produces. Because the
//! producer is the audio thread, and [`sampler_sync::spsc_ring`] requires `T: Copy +
//! bytemuck::AnyBitPattern`, a `HashMap<String, f32>` cannot cross the queue. [`RtTriggerEvent`]
//! is the fixed-capacity `Copy` value that does: known parameter keys are resolved into a fixed
//! array at conversion time, before the event ever touches the ring.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

/// Parameter keys the module understands. Anything else in a [`TriggerEvent`]'s `parameters` map
/// is dropped with a rate-limited warning (see [`crate::logging`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParamKey {
    Position = 0,
    Speed = 1,
    Volume = 2,
    LoopSize = 3,
    RegionStart = 4,
    RegionEnd = 5,
    PolyphonyMode = 6,
}

impl ParamKey {
    pub const COUNT: usize = 7;

    pub const ALL: [ParamKey; Self::COUNT] = [
        ParamKey::Position,
        ParamKey::Speed,
        ParamKey::Volume,
        ParamKey::LoopSize,
        ParamKey::RegionStart,
        ParamKey::RegionEnd,
        ParamKey::PolyphonyMode,
    ];

    pub fn from_name(name: &str) -> Option<ParamKey> {
        Some(match name {
            "position" => ParamKey::Position,
            "speed" => ParamKey::Speed,
            "volume" => ParamKey::Volume,
            "loop_size" => ParamKey::LoopSize,
            "region_start" => ParamKey::RegionStart,
            "region_end" => ParamKey::RegionEnd,
            "polyphony_mode" => ParamKey::PolyphonyMode,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamKey::Position => "position",
            ParamKey::Speed => "speed",
            ParamKey::Volume => "volume",
            ParamKey::LoopSize => "loop_size",
            ParamKey::RegionStart => "region_start",
            ParamKey::RegionEnd => "region_end",
            ParamKey::PolyphonyMode => "polyphony_mode",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// The host-facing trigger event schema, as produced by a sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub step: i32,
    /// -1 means "rest": stop the module's current active voice.
    pub media_index: i32,
    /// Seconds; 0 means untimed/hold (no scheduled stop).
    pub duration: f32,
    pub parameters: HashMap<String, f32>,
}

impl TriggerEvent {
    pub fn rest(step: i32) -> Self {
        Self {
            step,
            media_index: -1,
            duration: 0.0,
            parameters: HashMap::new(),
        }
    }

    pub fn new(step: i32, media_index: i32, duration: f32) -> Self {
        Self {
            step,
            media_index,
            duration,
            parameters: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: f32) -> Self {
        self.parameters.insert(key.to_owned(), value);
        self
    }

    /// Convert to the fixed-capacity, `Copy` encoding used on the Trigger Queue. Unknown keys are
    /// returned separately so the caller can warn about them off the audio thread's hot path (the
    /// warning itself still goes through the realtime-safe logging ring if called from there).
    pub fn to_rt_event(&self) -> (RtTriggerEvent, UnknownKeyCount) {
        let mut slots = [0.0f32; ParamKey::COUNT];
        let mut present = [false; ParamKey::COUNT];
        let mut unknown = 0u32;

        for (k, v) in &self.parameters {
            match ParamKey::from_name(k) {
                Some(key) => {
                    slots[key.slot()] = *v;
                    present[key.slot()] = true;
                }
                None => unknown += 1,
            }
        }

        (
            RtTriggerEvent {
                step: self.step,
                media_index: self.media_index,
                duration: self.duration,
                param_values: slots,
                param_present: present_to_bitmask(present),
            },
            UnknownKeyCount(unknown),
        )
    }
}

pub struct UnknownKeyCount(pub u32);

fn present_to_bitmask(present: [bool; ParamKey::COUNT]) -> u32 {
    let mut mask = 0u32;
    for (i, p) in present.iter().enumerate() {
        if *p {
            mask |= 1 << i;
        }
    }
    mask
}

/// The fixed-capacity, `Copy`, `bytemuck::AnyBitPattern` event that actually crosses the Trigger
/// Queue. Produced once, at the audio→control boundary, from a [`TriggerEvent`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct RtTriggerEvent {
    pub step: i32,
    pub media_index: i32,
    pub duration: f32,
    param_values: [f32; ParamKey::COUNT],
    // u32 rather than u8 so the struct has no trailing padding bytes (bytemuck::Pod requires a
    // fully-defined byte layout).
    param_present: u32,
}

// Safety: every field is a plain-old-data numeric type and the struct has a defined `repr(C)`
// layout with no padding-sensitive invariants, so any bit pattern is valid.
unsafe impl Zeroable for RtTriggerEvent {}
unsafe impl Pod for RtTriggerEvent {}
unsafe impl bytemuck::AnyBitPattern for RtTriggerEvent {}

impl RtTriggerEvent {
    pub fn get(&self, key: ParamKey) -> Option<f32> {
        if self.param_present & (1 << key.slot()) != 0 {
            Some(self.param_values[key.slot()])
        } else {
            None
        }
    }

    pub fn is_rest(&self) -> bool {
        self.media_index < 0
    }

    /// Rebuild the string-keyed view, e.g. for logging or snapshotting a dropped event.
    pub fn to_trigger_event(&self) -> TriggerEvent {
        let mut parameters = HashMap::new();
        for key in ParamKey::ALL {
            if let Some(v) = self.get(key) {
                parameters.insert(key.name().to_owned(), v);
            }
        }
        TriggerEvent {
            step: self.step,
            media_index: self.media_index,
            duration: self.duration,
            parameters,
        }
    }
}
