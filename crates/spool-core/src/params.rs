//! Normalized parameter interface
//!
//! Every engine parameter travels as a normalized `f32` in [0, 1] and is
//! rescaled by whoever consumes it (mixer, effects, sources). The store keeps
//! the normalized value exactly as written, so `set` followed by `get` returns
//! the same bits.
//!
//! Parameters are addressed by a flat [`ParamId`] plus a slot index: channel
//! parameters have one slot per mixer channel, track parameters one per track
//! voice, and global parameters a single slot 0.

use std::sync::atomic::Ordering;

use crate::types::{AtomicF32, NUM_CHANNELS, NUM_TRACKS};

/// Largest slot count of any parameter
pub const MAX_PARAM_SLOTS: usize = NUM_CHANNELS;

/// Mapping from a normalized value to the parameter's actual range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamCurve {
    /// `min + v * (max - min)`
    Linear { min: f32, max: f32 },
    /// `min * (max / min)^v` (log-frequency style)
    Exponential { min: f32, max: f32 },
    /// `min + v^2 * (max - min)`
    Quadratic { min: f32, max: f32 },
    /// `round(v * (steps - 1))`, reported as a float index
    Stepped { steps: u32 },
    /// Off below 0.5, on at or above
    Toggle,
}

impl ParamCurve {
    /// Map a normalized value to the actual range
    pub fn to_actual(self, normalized: f32) -> f32 {
        let v = normalized.clamp(0.0, 1.0);
        match self {
            ParamCurve::Linear { min, max } => min + v * (max - min),
            ParamCurve::Exponential { min, max } => min * (max / min).powf(v),
            ParamCurve::Quadratic { min, max } => min + v * v * (max - min),
            ParamCurve::Stepped { .. } => self.step_index(v) as f32,
            ParamCurve::Toggle => {
                if v >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Inverse of [`to_actual`](Self::to_actual)
    pub fn to_normalized(self, actual: f32) -> f32 {
        let v = match self {
            ParamCurve::Linear { min, max } => (actual - min) / (max - min),
            ParamCurve::Exponential { min, max } => (actual / min).ln() / (max / min).ln(),
            ParamCurve::Quadratic { min, max } => ((actual - min) / (max - min)).max(0.0).sqrt(),
            ParamCurve::Stepped { steps } => {
                if steps <= 1 {
                    0.0
                } else {
                    actual / (steps - 1) as f32
                }
            }
            ParamCurve::Toggle => {
                if actual >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        };
        v.clamp(0.0, 1.0)
    }

    /// Index selected by a normalized value on a stepped curve (0 otherwise)
    pub fn step_index(self, normalized: f32) -> usize {
        match self {
            ParamCurve::Stepped { steps } if steps > 1 => {
                (normalized.clamp(0.0, 1.0) * (steps - 1) as f32).round() as usize
            }
            _ => 0,
        }
    }
}

/// Information about a parameter
#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Parameter name for display
    pub name: String,
    /// Default value (0.0-1.0)
    pub default: f32,
    /// Normalized to actual mapping
    pub curve: ParamCurve,
    /// Unit label (e.g., "ms", "Hz", "%")
    pub unit: String,
}

impl Default for ParamInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            default: 0.5,
            curve: ParamCurve::Linear { min: 0.0, max: 1.0 },
            unit: String::new(),
        }
    }
}

impl ParamInfo {
    /// Create a new parameter info with name and default value
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            ..Default::default()
        }
    }

    /// Set a linear value range
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.curve = ParamCurve::Linear { min, max };
        self
    }

    /// Set an arbitrary mapping curve
    pub fn with_curve(mut self, curve: ParamCurve) -> Self {
        self.curve = curve;
        self
    }

    /// Set the unit label
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// Current parameter value
#[derive(Debug, Clone, Copy)]
pub struct ParamValue {
    /// Normalized value (0.0-1.0)
    pub normalized: f32,
    /// Actual value after range mapping
    pub actual: f32,
}

impl Default for ParamValue {
    fn default() -> Self {
        Self {
            normalized: 0.5,
            actual: 0.5,
        }
    }
}

impl ParamValue {
    /// Create from normalized value with the given param info
    pub fn from_normalized(normalized: f32, info: &ParamInfo) -> Self {
        let normalized = normalized.clamp(0.0, 1.0);
        let actual = info.curve.to_actual(normalized);
        Self { normalized, actual }
    }
}

/// Flat parameter enumeration shared with host bridges
///
/// The discriminants are part of the C ABI and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParamId {
    // Mixer channel (slot = channel index)
    ChannelGain = 0,
    ChannelPan = 1,
    ChannelSendA = 2,
    ChannelSendB = 3,
    ChannelMute = 4,
    ChannelSolo = 5,
    ChannelMicroDelay = 6,

    MasterGain = 7,

    // Tape delay (aux A)
    DelayTime = 8,
    DelayFeedback = 9,
    DelayMix = 10,
    DelayTone = 11,
    DelaySync = 12,
    DelayDivision = 13,
    DelayHeadMode = 14,
    DelayWow = 15,
    DelayFlutter = 16,

    // Reverb (aux B)
    ReverbSize = 17,
    ReverbDamping = 18,
    ReverbWidth = 19,
    ReverbMix = 20,

    // Master filter
    FilterCutoff = 21,
    FilterResonance = 22,
    FilterModel = 23,

    // Sound sources
    PolyHarmonics = 24,
    PolyTimbre = 25,
    PolyMorph = 26,
    PolyLevel = 27,
    ResonatorStructure = 28,
    ResonatorBrightness = 29,
    ResonatorDamping = 30,
    ResonatorPosition = 31,
    DrumTone = 32,
    DrumDecay = 33,
    SamplerPitch = 34,
    /// Slot = track index
    TrackSpeed = 35,
    /// Slot = track index
    TrackLevel = 36,
}

impl ParamId {
    /// Number of parameter ids
    pub const COUNT: usize = 37;

    /// All parameters in discriminant order
    pub const ALL: [ParamId; Self::COUNT] = [
        ParamId::ChannelGain,
        ParamId::ChannelPan,
        ParamId::ChannelSendA,
        ParamId::ChannelSendB,
        ParamId::ChannelMute,
        ParamId::ChannelSolo,
        ParamId::ChannelMicroDelay,
        ParamId::MasterGain,
        ParamId::DelayTime,
        ParamId::DelayFeedback,
        ParamId::DelayMix,
        ParamId::DelayTone,
        ParamId::DelaySync,
        ParamId::DelayDivision,
        ParamId::DelayHeadMode,
        ParamId::DelayWow,
        ParamId::DelayFlutter,
        ParamId::ReverbSize,
        ParamId::ReverbDamping,
        ParamId::ReverbWidth,
        ParamId::ReverbMix,
        ParamId::FilterCutoff,
        ParamId::FilterResonance,
        ParamId::FilterModel,
        ParamId::PolyHarmonics,
        ParamId::PolyTimbre,
        ParamId::PolyMorph,
        ParamId::PolyLevel,
        ParamId::ResonatorStructure,
        ParamId::ResonatorBrightness,
        ParamId::ResonatorDamping,
        ParamId::ResonatorPosition,
        ParamId::DrumTone,
        ParamId::DrumDecay,
        ParamId::SamplerPitch,
        ParamId::TrackSpeed,
        ParamId::TrackLevel,
    ];

    /// Convert from the raw ABI value
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Number of valid slot (voice) indices for this parameter
    pub fn slot_count(self) -> usize {
        use ParamId::*;
        match self {
            ChannelGain | ChannelPan | ChannelSendA | ChannelSendB | ChannelMute
            | ChannelSolo | ChannelMicroDelay => NUM_CHANNELS,
            TrackSpeed | TrackLevel => NUM_TRACKS,
            _ => 1,
        }
    }

    /// Normalized default value
    pub fn default_value(self) -> f32 {
        use ParamId::*;
        match self {
            ChannelGain => 0.8,
            ChannelPan => 0.5,
            ChannelSendA | ChannelSendB | ChannelMute | ChannelSolo | ChannelMicroDelay => 0.0,
            MasterGain => 0.8,
            DelayTime => 0.4,
            DelayFeedback => 0.35,
            DelayMix => 0.3,
            DelayTone => 0.6,
            DelaySync => 1.0,
            // Quarter note in the 9-entry division table
            DelayDivision => 0.75,
            DelayHeadMode => 0.0,
            DelayWow => 0.2,
            DelayFlutter => 0.2,
            ReverbSize => 0.5,
            ReverbDamping => 0.5,
            ReverbWidth => 1.0,
            ReverbMix => 0.3,
            FilterCutoff => 1.0,
            FilterResonance => 0.0,
            FilterModel => 0.0,
            PolyLevel | TrackLevel => 0.8,
            _ => 0.5,
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        use ParamId::*;
        match self {
            ChannelGain => "Channel Gain",
            ChannelPan => "Channel Pan",
            ChannelSendA => "Send A",
            ChannelSendB => "Send B",
            ChannelMute => "Mute",
            ChannelSolo => "Solo",
            ChannelMicroDelay => "Micro Delay",
            MasterGain => "Master Gain",
            DelayTime => "Delay Time",
            DelayFeedback => "Delay Feedback",
            DelayMix => "Delay Mix",
            DelayTone => "Delay Tone",
            DelaySync => "Delay Sync",
            DelayDivision => "Delay Division",
            DelayHeadMode => "Delay Heads",
            DelayWow => "Delay Wow",
            DelayFlutter => "Delay Flutter",
            ReverbSize => "Reverb Size",
            ReverbDamping => "Reverb Damping",
            ReverbWidth => "Reverb Width",
            ReverbMix => "Reverb Mix",
            FilterCutoff => "Filter Cutoff",
            FilterResonance => "Filter Resonance",
            FilterModel => "Filter Model",
            PolyHarmonics => "Harmonics",
            PolyTimbre => "Timbre",
            PolyMorph => "Morph",
            PolyLevel => "Level",
            ResonatorStructure => "Structure",
            ResonatorBrightness => "Brightness",
            ResonatorDamping => "Damping",
            ResonatorPosition => "Position",
            DrumTone => "Drum Tone",
            DrumDecay => "Drum Decay",
            SamplerPitch => "Sampler Pitch",
            TrackSpeed => "Track Speed",
            TrackLevel => "Track Level",
        }
    }
}

/// Lock-free store of normalized parameter values
///
/// Written by control threads, read once per block by the audio thread.
/// A one-block-stale read is acceptable; smoothing absorbs it.
pub struct ParameterStore {
    values: Box<[AtomicF32]>,
}

impl ParameterStore {
    /// Create a store holding every parameter's default
    pub fn new() -> Self {
        let values = (0..ParamId::COUNT * MAX_PARAM_SLOTS)
            .map(|i| AtomicF32::new(ParamId::ALL[i / MAX_PARAM_SLOTS].default_value()))
            .collect();
        Self { values }
    }

    #[inline]
    fn slot(&self, id: ParamId, slot: usize) -> Option<&AtomicF32> {
        if slot < id.slot_count() {
            self.values.get(id.index() * MAX_PARAM_SLOTS + slot)
        } else {
            None
        }
    }

    /// Store a normalized value
    ///
    /// Returns false (and changes nothing) for an out-of-range slot or a
    /// non-finite value. Finite values are clamped to [0, 1].
    pub fn set(&self, id: ParamId, slot: usize, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.slot(id, slot) {
            Some(cell) => {
                cell.store(value.clamp(0.0, 1.0), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Read a normalized value (0.0 for an out-of-range slot)
    #[inline]
    pub fn get(&self, id: ParamId, slot: usize) -> f32 {
        self.slot(id, slot)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0.0)
    }

    /// Restore every parameter to its default
    pub fn reset_to_defaults(&self) {
        for id in ParamId::ALL {
            for slot in 0..id.slot_count() {
                self.set(id, slot, id.default_value());
            }
        }
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_ids_are_dense() {
        for (i, id) in ParamId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i, "{:?} out of order", id);
            assert_eq!(ParamId::from_u32(i as u32), Some(*id));
        }
        assert_eq!(ParamId::from_u32(ParamId::COUNT as u32), None);
    }

    #[test]
    fn test_round_trip_every_parameter() {
        let store = ParameterStore::new();
        for id in ParamId::ALL {
            for slot in 0..id.slot_count() {
                for step in 0..=20 {
                    let v = step as f32 / 20.0;
                    assert!(store.set(id, slot, v));
                    assert_eq!(store.get(id, slot), v, "{:?}[{}] at {}", id, slot, v);
                }
            }
        }
    }

    #[test]
    fn test_invalid_slot_and_nan_are_ignored() {
        let store = ParameterStore::new();
        assert!(!store.set(ParamId::MasterGain, 1, 0.1));
        assert_eq!(store.get(ParamId::MasterGain, 1), 0.0);
        assert!(!store.set(ParamId::TrackSpeed, NUM_TRACKS, 0.1));

        assert!(!store.set(ParamId::ChannelGain, 0, f32::NAN));
        assert_eq!(store.get(ParamId::ChannelGain, 0), 0.8);
    }

    #[test]
    fn test_values_are_clamped() {
        let store = ParameterStore::new();
        store.set(ParamId::ReverbMix, 0, 3.0);
        assert_eq!(store.get(ParamId::ReverbMix, 0), 1.0);
        store.set(ParamId::ReverbMix, 0, -1.0);
        assert_eq!(store.get(ParamId::ReverbMix, 0), 0.0);
    }

    #[test]
    fn test_curve_inverse() {
        let curves = [
            ParamCurve::Linear { min: -1.0, max: 1.0 },
            ParamCurve::Exponential { min: 20.0, max: 20000.0 },
            ParamCurve::Quadratic { min: 60.0, max: 450.0 },
        ];
        for curve in curves {
            for step in 0..=10 {
                let v = step as f32 / 10.0;
                let back = curve.to_normalized(curve.to_actual(v));
                assert!((back - v).abs() < 1e-4, "{:?}: {} -> {}", curve, v, back);
            }
        }
    }

    #[test]
    fn test_stepped_curve() {
        let curve = ParamCurve::Stepped { steps: 9 };
        assert_eq!(curve.step_index(0.0), 0);
        assert_eq!(curve.step_index(0.75), 6);
        assert_eq!(curve.step_index(1.0), 8);
        assert_eq!(curve.to_normalized(6.0), 0.75);
    }

    #[test]
    fn test_param_value_mapping() {
        let info = ParamInfo::new("Test", 0.5).with_range(0.0, 100.0);
        let value = ParamValue::from_normalized(0.5, &info);
        assert_eq!(value.normalized, 0.5);
        assert_eq!(value.actual, 50.0);
        assert_eq!(ParamValue::from_normalized(2.0, &info).actual, 100.0);
    }

    #[test]
    fn test_reset_to_defaults() {
        let store = ParameterStore::new();
        store.set(ParamId::ChannelPan, 3, 0.0);
        store.reset_to_defaults();
        assert_eq!(store.get(ParamId::ChannelPan, 3), 0.5);
    }
}
