//! Modulation matrix
//!
//! Clock outputs route into a fixed set of destinations. Every block the
//! matrix is cleared and rebuilt from the current routings, then the
//! accumulated values are pushed to the sources (and used to bias effect
//! parameters). Removing a routing therefore silences it on the next block.

use crate::params::ParamId;
use crate::source::SourceParam;
use crate::types::Channel;

const TRACK_CHANNELS: [Channel; 4] = [
    Channel::Track1,
    Channel::Track2,
    Channel::Track3,
    Channel::Track4,
];

/// Modulation destination
///
/// The discriminants are part of the C ABI and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ModDestination {
    #[default]
    None = 0,
    PolyHarmonics = 1,
    PolyTimbre = 2,
    PolyMorph = 3,
    PolyLevel = 4,
    ResonatorStructure = 5,
    ResonatorBrightness = 6,
    ResonatorDamping = 7,
    ResonatorPosition = 8,
    DrumTone = 9,
    DrumDecay = 10,
    SamplerPitch = 11,
    /// All four track voices
    TrackSpeed = 12,
    /// All four track voices
    TrackLevel = 13,
    DelayTime = 14,
    DelayFeedback = 15,
    ReverbSize = 16,
    FilterCutoff = 17,
    FilterResonance = 18,
}

impl ModDestination {
    pub const COUNT: usize = 19;

    pub const ALL: [ModDestination; Self::COUNT] = [
        ModDestination::None,
        ModDestination::PolyHarmonics,
        ModDestination::PolyTimbre,
        ModDestination::PolyMorph,
        ModDestination::PolyLevel,
        ModDestination::ResonatorStructure,
        ModDestination::ResonatorBrightness,
        ModDestination::ResonatorDamping,
        ModDestination::ResonatorPosition,
        ModDestination::DrumTone,
        ModDestination::DrumDecay,
        ModDestination::SamplerPitch,
        ModDestination::TrackSpeed,
        ModDestination::TrackLevel,
        ModDestination::DelayTime,
        ModDestination::DelayFeedback,
        ModDestination::ReverbSize,
        ModDestination::FilterCutoff,
        ModDestination::FilterResonance,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Channels and source parameter this destination modulates
    pub fn source_target(self) -> Option<(&'static [Channel], SourceParam)> {
        use ModDestination::*;
        let target: (&'static [Channel], SourceParam) = match self {
            PolyHarmonics => (&[Channel::PolySynth], SourceParam::Harmonics),
            PolyTimbre => (&[Channel::PolySynth], SourceParam::Timbre),
            PolyMorph => (&[Channel::PolySynth], SourceParam::Morph),
            PolyLevel => (&[Channel::PolySynth], SourceParam::Level),
            ResonatorStructure => (&[Channel::Resonator], SourceParam::Structure),
            ResonatorBrightness => (&[Channel::Resonator], SourceParam::Brightness),
            ResonatorDamping => (&[Channel::Resonator], SourceParam::Damping),
            ResonatorPosition => (&[Channel::Resonator], SourceParam::Position),
            DrumTone => (&[Channel::DrumBank], SourceParam::Tone),
            DrumDecay => (&[Channel::DrumBank], SourceParam::Decay),
            SamplerPitch => (&[Channel::Sampler], SourceParam::Pitch),
            TrackSpeed => (&TRACK_CHANNELS, SourceParam::Speed),
            TrackLevel => (&TRACK_CHANNELS, SourceParam::Level),
            _ => return Option::None,
        };
        Some(target)
    }

    /// Effect parameter this destination biases
    pub fn effect_param(self) -> Option<ParamId> {
        match self {
            ModDestination::DelayTime => Some(ParamId::DelayTime),
            ModDestination::DelayFeedback => Some(ParamId::DelayFeedback),
            ModDestination::ReverbSize => Some(ParamId::ReverbSize),
            ModDestination::FilterCutoff => Some(ParamId::FilterCutoff),
            ModDestination::FilterResonance => Some(ParamId::FilterResonance),
            _ => None,
        }
    }

    /// Destination biasing an effect parameter, if any
    pub fn for_effect_param(id: ParamId) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.effect_param() == Some(id))
    }
}

/// Accumulated modulation for one block
#[derive(Debug, Clone)]
pub struct ModulationMatrix {
    values: [f32; ModDestination::COUNT],
}

impl ModulationMatrix {
    pub fn new() -> Self {
        Self {
            values: [0.0; ModDestination::COUNT],
        }
    }

    /// Clear every destination (start of each block)
    pub fn reset(&mut self) {
        self.values = [0.0; ModDestination::COUNT];
    }

    /// Add a bipolar contribution; `None` is ignored
    pub fn add(&mut self, destination: ModDestination, amount: f32) {
        if destination != ModDestination::None && amount.is_finite() {
            self.values[destination.index()] += amount;
        }
    }

    #[inline]
    pub fn get(&self, destination: ModDestination) -> f32 {
        self.values[destination.index()]
    }

    /// Whether every destination is zero
    pub fn is_clear(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }
}

impl Default for ModulationMatrix {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destinations_are_dense() {
        for (i, dest) in ModDestination::ALL.iter().enumerate() {
            assert_eq!(dest.index(), i);
            assert_eq!(ModDestination::from_u32(i as u32), Some(*dest));
        }
        assert_eq!(ModDestination::from_u32(ModDestination::COUNT as u32), None);
    }

    #[test]
    fn test_every_destination_has_one_target() {
        for dest in ModDestination::ALL.iter().skip(1) {
            let routes = dest.source_target().is_some() as u8 + dest.effect_param().is_some() as u8;
            assert_eq!(routes, 1, "{:?}", dest);
        }
        assert!(ModDestination::None.source_target().is_none());
        assert_eq!(
            ModDestination::for_effect_param(ParamId::FilterCutoff),
            Some(ModDestination::FilterCutoff)
        );
        assert_eq!(ModDestination::for_effect_param(ParamId::ChannelGain), None);
    }

    #[test]
    fn test_contributions_add_and_reset() {
        let mut matrix = ModulationMatrix::new();
        matrix.add(ModDestination::PolyTimbre, 0.25);
        matrix.add(ModDestination::PolyTimbre, -0.5);
        matrix.add(ModDestination::None, 1.0);
        assert_eq!(matrix.get(ModDestination::PolyTimbre), -0.25);
        assert_eq!(matrix.get(ModDestination::None), 0.0);

        matrix.reset();
        assert!(matrix.is_clear());
    }
}
